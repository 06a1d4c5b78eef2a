use ulid::Ulid;

use crate::model::{InvalidRange, Ms};

use super::availability::Decision;

#[derive(Debug)]
pub enum EngineError {
    /// Candidate or stored span with `start >= end`.
    InvalidRange { start: Ms, end: Ms },
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The write-time availability guard refused a booking.
    BookingConflict { room_id: Ulid, reason: Decision },
    NotRoomHost { room_id: Ulid, user_id: Ulid },
    /// A host tried to book their own room as a guest.
    OwnRoom(Ulid),
    InPast(Ms),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Errors caused by the request itself rather than by the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, EngineError::WalError(_))
    }
}

impl From<InvalidRange> for EngineError {
    fn from(e: InvalidRange) -> Self {
        EngineError::InvalidRange {
            start: e.start,
            end: e.end,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid range [{start}, {end}): start must be before end")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::BookingConflict { room_id, reason } => match reason {
                Decision::Conflict(other) => write!(
                    f,
                    "room {room_id} not available: overlaps reservation {other}"
                ),
                Decision::HostClosed => write!(
                    f,
                    "room {room_id} not available: host has not opened it for these dates"
                ),
                Decision::Available => write!(f, "room {room_id} not available"),
            },
            EngineError::NotRoomHost { room_id, user_id } => {
                write!(f, "user {user_id} is not the host of room {room_id}")
            }
            EngineError::OwnRoom(room_id) => {
                write!(f, "hosts cannot reserve their own room {room_id}")
            }
            EngineError::InPast(start) => write!(f, "start {start} is not in the future"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
