use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

use super::search::StructuralFilter;
use super::{Engine, EngineError};

/// Read side: room snapshots. Search and availability checks only ever see
/// what this hands out.
#[async_trait]
pub trait RoomCatalog: Send + Sync {
    async fn load_room(&self, id: Ulid) -> Option<RoomState>;

    /// Rooms matching `filter`, in the catalog's natural order.
    async fn query_rooms(&self, filter: &StructuralFilter) -> Vec<RoomState>;
}

/// Write side for reservations. Implementations must refuse a booking that
/// conflicts with what is stored at write time.
#[async_trait]
pub trait ReservationLedger: Send + Sync {
    async fn insert_guest_reservation(
        &self,
        new: NewGuestReservation,
    ) -> Result<GuestReservation, EngineError>;

    async fn insert_host_interval(
        &self,
        new: NewHostInterval,
    ) -> Result<HostOpenInterval, EngineError>;
}

#[async_trait]
impl RoomCatalog for Engine {
    async fn load_room(&self, id: Ulid) -> Option<RoomState> {
        self.get_room(id).await
    }

    async fn query_rooms(&self, filter: &StructuralFilter) -> Vec<RoomState> {
        let mut out = Vec::new();
        for rs in self.rooms_in_order() {
            let guard = rs.read().await;
            if filter.matches(&guard.room) {
                out.push(guard.clone());
            }
        }
        out
    }
}

#[async_trait]
impl ReservationLedger for Engine {
    async fn insert_guest_reservation(
        &self,
        new: NewGuestReservation,
    ) -> Result<GuestReservation, EngineError> {
        self.reserve(new).await
    }

    async fn insert_host_interval(
        &self,
        new: NewHostInterval,
    ) -> Result<HostOpenInterval, EngineError> {
        self.open_interval(new).await
    }
}
