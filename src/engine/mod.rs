mod availability;
mod conflict;
mod error;
mod mutations;
mod ports;
mod queries;
mod search;
#[cfg(test)]
mod tests;

pub use availability::{is_available, resolve, resolve_excluding, AvailabilityIndex, Decision};
pub use error::EngineError;
pub use ports::{ReservationLedger, RoomCatalog};
pub use queries::{HostIntervalScope, ReservationScope};
pub use search::{RoomFilter, RoomSearch, RoomSummary, StructuralFilter};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{
    mpsc, oneshot, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use tracing::{error, info};
use ulid::Ulid;

use crate::model::*;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

type Ack = oneshot::Sender<io::Result<()>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append { event: Event, response: Ack },
    Control(WalControl),
}

pub(super) enum WalControl {
    Compact { events: Vec<Event>, response: Ack },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Owns the WAL. Every append that is already queued when the first one
/// arrives rides along in the same fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            WalCommand::Control(control) => {
                handle_control(&mut wal, control);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                WalCommand::Control(control) => {
                    // Control commands observe everything queued before them.
                    deferred = Some(control);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(control) = deferred {
            handle_control(&mut wal, control);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<(Event, Ack)>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = write_batch(wal, &batch);
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    if let Err(e) = &result {
        error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, ack) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = ack.send(reply);
    }
}

fn write_batch(wal: &mut Wal, batch: &[(Event, Ack)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    // A failed batch must not leave partial records for the next one to
    // append behind.
    if result.is_err()
        && let Err(e) = wal.rollback()
    {
        error!("WAL rollback after failed flush also failed: {e}");
    }
    result
}

fn handle_control(wal: &mut Wal, control: WalControl) {
    match control {
        WalControl::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalControl::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
    }
}

// ── Engine ───────────────────────────────────────────────

/// Room catalog and reservation ledger in one: rooms with their intervals in
/// memory, every change appended to the WAL before it is applied.
pub struct Engine {
    rooms: DashMap<Ulid, SharedRoomState>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: reservation / host window / image id → room id
    entity_to_room: DashMap<Ulid, Ulid>,
    /// Every mutation holds this shared from before its checks until its
    /// event is applied. Compaction holds it exclusively, so its snapshot
    /// and the log swap see no writes in between.
    write_gate: RwLock<()>,
}

fn move_interval(rs: &mut RoomState, id: Ulid, span: Span) {
    if let Some(mut interval) = rs.remove_interval(id) {
        interval.span = span;
        rs.insert_interval(interval);
    }
}

/// Apply an event to a room the caller already holds exclusively.
fn apply_to_room(rs: &mut RoomState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomUpdated { room } => rs.room = room.clone(),
        Event::ImageAttached { id, room_id } => {
            rs.images.push(*id);
            entity_map.insert(*id, *room_id);
        }
        Event::ImageDetached { id, .. } => {
            rs.images.retain(|image| image != id);
            entity_map.remove(id);
        }
        Event::ReservationPlaced {
            id,
            room_id,
            guest_id,
            host_id,
            span,
        } => {
            rs.insert_interval(Interval {
                id: *id,
                span: *span,
                kind: IntervalKind::Guest {
                    guest_id: *guest_id,
                    host_id: *host_id,
                },
            });
            entity_map.insert(*id, *room_id);
        }
        Event::HostIntervalOpened {
            id,
            room_id,
            host_id,
            span,
        } => {
            rs.insert_interval(Interval {
                id: *id,
                span: *span,
                kind: IntervalKind::HostOpen { host_id: *host_id },
            });
            entity_map.insert(*id, *room_id);
        }
        Event::ReservationMoved { id, span, .. } | Event::HostIntervalMoved { id, span, .. } => {
            move_interval(rs, *id, *span);
        }
        Event::ReservationCancelled { id, .. } | Event::HostIntervalClosed { id, .. } => {
            rs.remove_interval(*id);
            entity_map.remove(id);
        }
        // Creation and deletion happen at the DashMap level.
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            wal_tx,
            entity_to_room: DashMap::new(),
            write_gate: RwLock::new(()),
        };

        // Sole owner of every Arc here, so try_write never contends. Never
        // block: this can run inside an async context.
        for event in &events {
            match event {
                Event::RoomCreated { room } => {
                    engine
                        .rooms
                        .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                }
                Event::RoomDeleted { id } => {
                    if let Some((_, rs)) = engine.rooms.remove(id)
                        && let Ok(guard) = rs.try_read()
                    {
                        engine.unmap_room_entities(&guard);
                    }
                }
                other => {
                    let Some(rs) = engine.get_room_state(&other.room_id()) else {
                        continue;
                    };
                    let Ok(mut guard) = rs.try_write() else {
                        continue;
                    };
                    apply_to_room(&mut guard, other, &engine.entity_to_room);
                }
            }
        }

        info!(
            "replayed {} events: {} rooms, {} attached entities",
            events.len(),
            engine.rooms.len(),
            engine.entity_to_room.len()
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    async fn wal_control<T>(
        &self,
        control: WalControl,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, EngineError> {
        self.wal_tx
            .send(WalCommand::Control(control))
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_room_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_room.get(entity_id).map(|e| *e.value())
    }

    /// All rooms in ascending id order, which for ULIDs is creation order.
    /// The DashMap guards are released before the caller awaits any lock.
    pub(super) fn rooms_in_order(&self) -> Vec<SharedRoomState> {
        let mut entries: Vec<(Ulid, SharedRoomState)> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, rs)| rs).collect()
    }

    fn unmap_room_entities(&self, rs: &RoomState) {
        for interval in &rs.intervals {
            self.entity_to_room.remove(&interval.id);
        }
        for image in &rs.images {
            self.entity_to_room.remove(image);
        }
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.entity_to_room);
        Ok(())
    }

    pub(super) async fn write_permit(&self) -> RwLockReadGuard<'_, ()> {
        self.write_gate.read().await
    }

    pub(super) async fn exclusive_write_permit(&self) -> RwLockWriteGuard<'_, ()> {
        self.write_gate.write().await
    }

    /// Write-lock a live room. A room deleted while we waited for the lock
    /// is `NotFound`.
    pub(super) async fn lock_room(
        &self,
        room_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        if guard.deleted {
            return Err(EngineError::NotFound(room_id));
        }
        Ok(guard)
    }

    /// Lookup entity → room, then `lock_room`.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .get_room_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let guard = self
            .lock_room(room_id)
            .await
            .map_err(|_| EngineError::NotFound(*entity_id))?;
        Ok((room_id, guard))
    }
}
