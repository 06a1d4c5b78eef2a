use ulid::Ulid;

use crate::model::*;

use super::availability::{resolve, Decision};
use super::search::{RoomFilter, RoomSearch, RoomSummary};
use super::{Engine, EngineError};

/// Which guest reservations to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationScope {
    Room(Ulid),
    Guest(Ulid),
    Host(Ulid),
}

impl ReservationScope {
    fn admits(&self, r: &GuestReservation) -> bool {
        match self {
            ReservationScope::Room(id) => r.room_id == *id,
            ReservationScope::Guest(id) => r.guest_id == *id,
            ReservationScope::Host(id) => r.host_id == *id,
        }
    }
}

/// Which host windows to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostIntervalScope {
    Room(Ulid),
    Host(Ulid),
}

impl HostIntervalScope {
    fn admits(&self, w: &HostOpenInterval) -> bool {
        match self {
            HostIntervalScope::Room(id) => w.room_id == *id,
            HostIntervalScope::Host(id) => w.host_id == *id,
        }
    }
}

impl Engine {
    /// Snapshot of one room with everything attached to it.
    pub async fn get_room(&self, id: Ulid) -> Option<RoomState> {
        let rs = self.get_room_state(&id)?;
        let guard = rs.read().await;
        Some(guard.clone())
    }

    /// Full decision for a candidate stay. The range is checked before the
    /// room is looked up.
    pub async fn check_availability(
        &self,
        room_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Decision, EngineError> {
        let candidate = Span::new(start, end)?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(resolve(&guard, &candidate))
    }

    /// Advisory: the answer can be stale by the time a booking is written.
    /// `reserve` re-checks under the room lock.
    pub async fn is_available(&self, room_id: Ulid, start: Ms, end: Ms) -> Result<bool, EngineError> {
        Ok(self
            .check_availability(room_id, start, end)
            .await?
            .is_available())
    }

    pub async fn search(&self, filter: &RoomFilter) -> Result<Vec<RoomSummary>, EngineError> {
        RoomSearch::new(self).search(filter).await
    }

    pub async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::new();
        for rs in self.rooms_in_order() {
            rooms.push(rs.read().await.room.clone());
        }
        rooms
    }

    /// Ordered by room (creation order), then by start within a room.
    pub async fn get_reservations(&self, scope: ReservationScope) -> Vec<GuestReservation> {
        let rooms: Vec<_> = match scope {
            ReservationScope::Room(id) => self.get_room_state(&id).into_iter().collect(),
            _ => self.rooms_in_order(),
        };
        let mut out = Vec::new();
        for rs in rooms {
            let guard = rs.read().await;
            out.extend(guard.guest_reservations().filter(|r| scope.admits(r)));
        }
        out
    }

    pub async fn get_host_intervals(&self, scope: HostIntervalScope) -> Vec<HostOpenInterval> {
        let rooms: Vec<_> = match scope {
            HostIntervalScope::Room(id) => self.get_room_state(&id).into_iter().collect(),
            HostIntervalScope::Host(_) => self.rooms_in_order(),
        };
        let mut out = Vec::new();
        for rs in rooms {
            let guard = rs.read().await;
            out.extend(guard.host_intervals().filter(|w| scope.admits(w)));
        }
        out
    }
}
