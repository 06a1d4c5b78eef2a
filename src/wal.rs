use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Largest payload a record may carry. A longer length prefix can only come
/// from a corrupt file.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Write one `[len][bincode][crc32]` record and return its size on disk.
fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_RECORD_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "event too large"));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(8 + payload.len() as u64)
}

/// Outcome of reading one record from the log.
enum Record {
    /// An intact event and the bytes its record occupies.
    Event(Event, u64),
    /// Clean end of file.
    End,
    /// Unusable tail: partial write, bad length or checksum mismatch.
    Torn(&'static str),
}

/// `Ok(false)` on EOF before the buffer is filled.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_record(reader: &mut impl Read) -> io::Result<Record> {
    let mut len_buf = [0u8; 4];
    if !fill(reader, &mut len_buf)? {
        return Ok(Record::End);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(Record::Torn("oversized length prefix"));
    }
    let mut payload = vec![0u8; len];
    if !fill(reader, &mut payload)? {
        return Ok(Record::Torn("truncated payload"));
    }
    let mut crc_buf = [0u8; 4];
    if !fill(reader, &mut crc_buf)? {
        return Ok(Record::Torn("truncated checksum"));
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Record::Torn("checksum mismatch"));
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Record::Event(event, 8 + len as u64)),
        Err(_) => Ok(Record::Torn("undecodable event")),
    }
}

/// Intact events and the length of the prefix that holds them.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0;
    loop {
        match read_record(&mut reader)? {
            Record::Event(event, size) => {
                events.push(event);
                valid_len += size;
            }
            Record::End => break,
            Record::Torn(reason) => {
                warn!(
                    "WAL {} has an unusable tail after {} events: {reason}",
                    path.display(),
                    events.len()
                );
                break;
            }
        }
    }
    Ok((events, valid_len))
}

/// Append-only event log backing the engine.
///
/// Each record is `[u32 le: len][bincode: Event][u32 le: crc32 of payload]`.
/// A crash mid-write leaves a torn last record. `recover` cuts it off before
/// the log is reopened, so later appends never land behind garbage.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length covered by the last successful `flush_sync`.
    committed_len: u64,
    pending_len: u64,
    pending_appends: u64,
    appends_since_compact: u64,
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

fn compact_tmp_path(path: &Path) -> PathBuf {
    path.with_extension("wal.tmp")
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let writer = open_append(path)?;
        let committed_len = writer.get_ref().metadata()?.len();
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            committed_len,
            pending_len: 0,
            pending_appends: 0,
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one record. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.pending_len += write_record(&mut self.writer, event)?;
        self.pending_appends += 1;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len += self.pending_len;
        self.pending_len = 0;
        self.pending_appends = 0;
        Ok(())
    }

    /// Throw away everything since the last successful `flush_sync`, both
    /// still-buffered bytes and any that already reached the file.
    pub fn rollback(&mut self) -> io::Result<()> {
        let fresh = open_append(&self.path)?;
        // into_parts hands back the buffer without writing it out.
        let _ = std::mem::replace(&mut self.writer, fresh).into_parts();
        self.writer.get_ref().set_len(self.committed_len)?;
        self.writer.get_ref().sync_all()?;
        self.appends_since_compact -= self.pending_appends;
        self.pending_len = 0;
        self.pending_appends = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First compaction phase: write `events` to a side file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(compact_tmp_path(path))?);
        for event in events {
            write_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Second compaction phase: rename the side file over the log and
    /// continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(compact_tmp_path(&self.path), &self.path)?;
        self.writer = open_append(&self.path)?;
        self.committed_len = self.writer.get_ref().metadata()?.len();
        self.pending_len = 0;
        self.pending_appends = 0;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every intact event in the log, in write order. A missing file is an
    /// empty log. Reading stops at the first torn record.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }

    /// Like `replay`, then truncate the file to its intact prefix. Run this
    /// before `open` on startup.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let (events, valid_len) = scan(path)?;
        let file = match OpenOptions::new().write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(events),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        if file_len > valid_len {
            warn!(
                "truncating {} torn bytes from WAL {}",
                file_len - valid_len,
                path.display()
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(events)
    }
}
