use ulid::Ulid;

use crate::model::*;

// ── Availability resolution ──────────────────────────────────────
//
// Two gates, always in this order:
//   1. host gate: if the room has any host windows, one of them must fully
//      contain the candidate. No host windows at all means always offered.
//   2. guest gate: no guest reservation may overlap the candidate.

/// Outcome of checking one candidate span against one room snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Available,
    /// The room has host windows and none of them covers the candidate.
    HostClosed,
    /// The candidate overlaps this guest reservation.
    Conflict(Ulid),
}

impl Decision {
    pub fn is_available(&self) -> bool {
        matches!(self, Decision::Available)
    }
}

/// Read-only view over a room's guest reservations and host windows.
pub struct AvailabilityIndex<'a> {
    room: &'a RoomState,
    has_host_windows: bool,
}

impl<'a> AvailabilityIndex<'a> {
    pub fn new(room: &'a RoomState) -> Self {
        let has_host_windows = room.intervals.iter().any(Interval::is_host_open);
        Self {
            room,
            has_host_windows,
        }
    }

    /// First guest reservation overlapping the candidate.
    pub fn conflicts_with(&self, candidate: &Span) -> Option<Ulid> {
        self.conflicts_excluding(candidate, None)
    }

    /// Like `conflicts_with`, ignoring the reservation `skip` (a reservation
    /// being moved must not collide with its own old dates).
    pub fn conflicts_excluding(&self, candidate: &Span, skip: Option<Ulid>) -> Option<Ulid> {
        self.room
            .overlapping(candidate)
            .filter(|i| i.is_guest() && Some(i.id) != skip)
            .map(|i| i.id)
            .next()
    }

    pub fn has_conflict(&self, candidate: &Span) -> bool {
        self.conflicts_with(candidate).is_some()
    }

    /// Containment, not overlap: a host window must cover the whole stay.
    pub fn is_host_open_for(&self, candidate: &Span) -> bool {
        if !self.has_host_windows {
            return true;
        }
        // A window containing the candidate necessarily overlaps it.
        self.room
            .overlapping(candidate)
            .any(|i| i.is_host_open() && i.span.contains_span(candidate))
    }
}

/// Decide whether `candidate` may be booked on `room`. Pure: no I/O, no state.
pub fn resolve(room: &RoomState, candidate: &Span) -> Decision {
    resolve_excluding(room, candidate, None)
}

pub fn resolve_excluding(room: &RoomState, candidate: &Span, skip: Option<Ulid>) -> Decision {
    let index = AvailabilityIndex::new(room);
    if !index.is_host_open_for(candidate) {
        return Decision::HostClosed;
    }
    match index.conflicts_excluding(candidate, skip) {
        Some(id) => Decision::Conflict(id),
        None => Decision::Available,
    }
}

pub fn is_available(room: &RoomState, candidate: &Span) -> bool {
    resolve(room, candidate).is_available()
}
