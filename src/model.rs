use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Every instant in the system is one of these.
pub type Ms = i64;

/// Parse an RFC 3339 timestamp (`2025-06-01T00:00:00Z`) into unix milliseconds.
pub fn parse_timestamp(s: &str) -> Option<Ms> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// A span whose start is not strictly before its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidRange {
    pub start: Ms,
    pub end: Ms,
}

impl std::fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid range [{}, {}): start must be before end", self.start, self.end)
    }
}

impl std::error::Error for InvalidRange {}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Result<Self, InvalidRange> {
        if start >= end {
            return Err(InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap: `[a, b)` and `[b, c)` are disjoint.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Rooms ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    /// The one user who owns this room.
    pub host_id: Ulid,
    pub title: String,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub rooms_count: Option<u32>,
    pub location: Option<String>,
    pub room_type: Option<String>,
    pub rate: Option<f64>,
}

impl Room {
    pub fn new(id: Ulid, host_id: Ulid, title: impl Into<String>) -> Self {
        Self {
            id,
            host_id,
            title: title.into(),
            subtitle: None,
            description: None,
            price: None,
            rooms_count: None,
            location: None,
            room_type: None,
            rate: None,
        }
    }
}

/// Partial room update. `Some` overwrites, `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomPatch {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub rooms_count: Option<u32>,
    pub location: Option<String>,
    pub room_type: Option<String>,
    pub rate: Option<f64>,
}

impl RoomPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(self, room: &mut Room) {
        if let Some(title) = self.title {
            room.title = title;
        }
        if self.subtitle.is_some() {
            room.subtitle = self.subtitle;
        }
        if self.description.is_some() {
            room.description = self.description;
        }
        if self.price.is_some() {
            room.price = self.price;
        }
        if self.rooms_count.is_some() {
            room.rooms_count = self.rooms_count;
        }
        if self.location.is_some() {
            room.location = self.location;
        }
        if self.room_type.is_some() {
            room.room_type = self.room_type;
        }
        if self.rate.is_some() {
            room.rate = self.rate;
        }
    }
}

/// Partial update of a reservation or host window's dates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanPatch {
    pub start: Option<Ms>,
    pub end: Option<Ms>,
}

impl SpanPatch {
    pub fn apply(&self, current: Span) -> Result<Span, InvalidRange> {
        Span::new(
            self.start.unwrap_or(current.start),
            self.end.unwrap_or(current.end),
        )
    }
}

// ── Intervals attached to a room ─────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalKind {
    /// The host offers the room to guests during this span.
    HostOpen { host_id: Ulid },
    /// A guest holds the room during this span.
    Guest { guest_id: Ulid, host_id: Ulid },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub id: Ulid,
    pub span: Span,
    pub kind: IntervalKind,
}

impl Interval {
    pub fn is_guest(&self) -> bool {
        matches!(self.kind, IntervalKind::Guest { .. })
    }

    pub fn is_host_open(&self) -> bool {
        matches!(self.kind, IntervalKind::HostOpen { .. })
    }
}

/// A room together with everything attached to it. Also the read snapshot
/// handed to availability checks and search.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomState {
    pub room: Room,
    /// Image references in attach order; the first one fronts search results.
    pub images: Vec<Ulid>,
    /// Guest reservations and host windows, sorted by `span.start`.
    pub intervals: Vec<Interval>,
    /// Set under the write lock when the room is deleted. Writers that
    /// were already queued on the lock see it and back off.
    pub deleted: bool,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            images: Vec::new(),
            intervals: Vec::new(),
            deleted: false,
        }
    }

    pub fn id(&self) -> Ulid {
        self.room.id
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    pub fn remove_interval(&mut self, id: Ulid) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    pub fn get_interval(&self, id: Ulid) -> Option<&Interval> {
        self.intervals.iter().find(|i| i.id == id)
    }

    /// Intervals whose span overlaps the query window.
    /// Everything at or past the partition point starts at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }

    pub fn guest_reservations(&self) -> impl Iterator<Item = GuestReservation> + '_ {
        let room_id = self.room.id;
        self.intervals.iter().filter_map(move |i| match i.kind {
            IntervalKind::Guest { guest_id, host_id } => Some(GuestReservation {
                id: i.id,
                room_id,
                guest_id,
                host_id,
                span: i.span,
            }),
            IntervalKind::HostOpen { .. } => None,
        })
    }

    pub fn host_intervals(&self) -> impl Iterator<Item = HostOpenInterval> + '_ {
        let room_id = self.room.id;
        self.intervals.iter().filter_map(move |i| match i.kind {
            IntervalKind::HostOpen { host_id } => Some(HostOpenInterval {
                id: i.id,
                room_id,
                host_id,
                span: i.span,
            }),
            IntervalKind::Guest { .. } => None,
        })
    }
}

// ── Records handed out to callers ────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestReservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub guest_id: Ulid,
    /// Copied from the room at booking time.
    pub host_id: Ulid,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostOpenInterval {
    pub id: Ulid,
    pub room_id: Ulid,
    pub host_id: Ulid,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewGuestReservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub guest_id: Ulid,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewHostInterval {
    pub id: Ulid,
    pub room_id: Ulid,
    pub host_id: Ulid,
    pub span: Span,
}

/// The WAL record format. Room updates carry the merged room so replay
/// never has to re-run patch logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        room: Room,
    },
    RoomDeleted {
        id: Ulid,
    },
    ImageAttached {
        id: Ulid,
        room_id: Ulid,
    },
    ImageDetached {
        id: Ulid,
        room_id: Ulid,
    },
    ReservationPlaced {
        id: Ulid,
        room_id: Ulid,
        guest_id: Ulid,
        host_id: Ulid,
        span: Span,
    },
    ReservationMoved {
        id: Ulid,
        room_id: Ulid,
        span: Span,
    },
    ReservationCancelled {
        id: Ulid,
        room_id: Ulid,
    },
    HostIntervalOpened {
        id: Ulid,
        room_id: Ulid,
        host_id: Ulid,
        span: Span,
    },
    HostIntervalMoved {
        id: Ulid,
        room_id: Ulid,
        span: Span,
    },
    HostIntervalClosed {
        id: Ulid,
        room_id: Ulid,
    },
}

impl Event {
    /// The room an event belongs to.
    pub fn room_id(&self) -> Ulid {
        match self {
            Event::RoomCreated { room } | Event::RoomUpdated { room } => room.id,
            Event::RoomDeleted { id } => *id,
            Event::ImageAttached { room_id, .. }
            | Event::ImageDetached { room_id, .. }
            | Event::ReservationPlaced { room_id, .. }
            | Event::ReservationMoved { room_id, .. }
            | Event::ReservationCancelled { room_id, .. }
            | Event::HostIntervalOpened { room_id, .. }
            | Event::HostIntervalMoved { room_id, .. }
            | Event::HostIntervalClosed { room_id, .. } => *room_id,
        }
    }
}
