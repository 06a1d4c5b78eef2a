use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_bookable, check_text, now_ms, require_future, validate_span};
use super::{Engine, EngineError, WalControl};

fn validate_room(room: &Room) -> Result<(), EngineError> {
    check_text(Some(room.title.as_str()), MAX_TITLE_LEN, "title too long")?;
    check_text(room.subtitle.as_deref(), MAX_TITLE_LEN, "subtitle too long")?;
    check_text(room.description.as_deref(), MAX_TEXT_LEN, "description too long")?;
    check_text(room.location.as_deref(), MAX_TITLE_LEN, "location too long")?;
    check_text(room.room_type.as_deref(), MAX_TITLE_LEN, "room type too long")?;
    Ok(())
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────────

    pub async fn create_room(&self, room: Room) -> Result<(), EngineError> {
        let _permit = self.write_permit().await;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        validate_room(&room)?;
        if self.rooms.contains_key(&room.id) {
            return Err(EngineError::AlreadyExists(room.id));
        }

        let id = room.id;
        let event = Event::RoomCreated { room: room.clone() };
        self.wal_append(&event).await?;
        self.rooms.insert(id, Arc::new(RwLock::new(RoomState::new(room))));
        info!("room {id} created");
        Ok(())
    }

    /// Merge `patch` into the stored room and return the result.
    pub async fn update_room(&self, id: Ulid, patch: RoomPatch) -> Result<Room, EngineError> {
        let _permit = self.write_permit().await;
        let mut guard = self.lock_room(id).await?;

        let mut room = guard.room.clone();
        patch.apply(&mut room);
        validate_room(&room)?;

        let event = Event::RoomUpdated { room: room.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(room)
    }

    /// Only the room's host may delete it. Reservations and host windows on
    /// the room go with it.
    pub async fn delete_room(&self, id: Ulid, acting_host: Ulid) -> Result<Room, EngineError> {
        let _permit = self.write_permit().await;
        let mut guard = self.lock_room(id).await?;
        if guard.room.host_id != acting_host {
            return Err(EngineError::NotRoomHost {
                room_id: id,
                user_id: acting_host,
            });
        }

        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        guard.deleted = true;
        self.rooms.remove(&id);
        self.unmap_room_entities(&guard);
        info!(
            "room {id} deleted with {} attached intervals",
            guard.intervals.len()
        );
        Ok(guard.room.clone())
    }

    pub async fn attach_image(&self, id: Ulid, room_id: Ulid) -> Result<(), EngineError> {
        let _permit = self.write_permit().await;
        let mut guard = self.lock_room(room_id).await?;
        if guard.images.len() >= MAX_IMAGES_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many images on room"));
        }
        if self.entity_to_room.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ImageAttached { id, room_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn detach_image(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _permit = self.write_permit().await;
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.images.contains(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ImageDetached { id, room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(room_id)
    }

    // ── Guest reservations ───────────────────────────────────

    /// Book a stay. Availability is re-checked under the room's write lock,
    /// so of two concurrent overlapping bookings exactly one commits and the
    /// other gets `BookingConflict`.
    pub async fn reserve(&self, new: NewGuestReservation) -> Result<GuestReservation, EngineError> {
        validate_span(&new.span)?;
        require_future(&new.span, now_ms())?;
        let _permit = self.write_permit().await;
        let mut guard = self.lock_room(new.room_id).await?;
        if guard.room.host_id == new.guest_id {
            return Err(EngineError::OwnRoom(new.room_id));
        }
        if guard.intervals.len() >= MAX_INTERVALS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many intervals on room"));
        }
        if self.entity_to_room.contains_key(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }

        check_bookable(&guard, &new.span, None)?;

        let reservation = GuestReservation {
            id: new.id,
            room_id: new.room_id,
            guest_id: new.guest_id,
            host_id: guard.room.host_id,
            span: new.span,
        };
        let event = Event::ReservationPlaced {
            id: reservation.id,
            room_id: reservation.room_id,
            guest_id: reservation.guest_id,
            host_id: reservation.host_id,
            span: reservation.span,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!(
            "reservation {} on room {} [{}, {})",
            reservation.id, reservation.room_id, reservation.span.start, reservation.span.end
        );
        Ok(reservation)
    }

    /// Move a reservation. The new dates pass the same guard as a fresh
    /// booking, ignoring the reservation's own current dates.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        patch: SpanPatch,
    ) -> Result<GuestReservation, EngineError> {
        let _permit = self.write_permit().await;
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard
            .guest_reservations()
            .find(|r| r.id == id)
            .ok_or(EngineError::NotFound(id))?;

        let span = patch.apply(current.span)?;
        validate_span(&span)?;
        if patch.start.is_some() {
            require_future(&span, now_ms())?;
        }
        check_bookable(&guard, &span, Some(id))?;

        let event = Event::ReservationMoved { id, room_id, span };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(GuestReservation { span, ..current })
    }

    pub async fn cancel_reservation(&self, id: Ulid) -> Result<GuestReservation, EngineError> {
        let _permit = self.write_permit().await;
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard
            .guest_reservations()
            .find(|r| r.id == id)
            .ok_or(EngineError::NotFound(id))?;
        let event = Event::ReservationCancelled { id, room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(current)
    }

    // ── Host windows ─────────────────────────────────────────

    /// Open the room to guests for `new.span`. Only the room's host may.
    pub async fn open_interval(&self, new: NewHostInterval) -> Result<HostOpenInterval, EngineError> {
        validate_span(&new.span)?;
        require_future(&new.span, now_ms())?;
        let _permit = self.write_permit().await;
        let mut guard = self.lock_room(new.room_id).await?;
        if guard.room.host_id != new.host_id {
            return Err(EngineError::NotRoomHost {
                room_id: new.room_id,
                user_id: new.host_id,
            });
        }
        if guard.intervals.len() >= MAX_INTERVALS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many intervals on room"));
        }
        if self.entity_to_room.contains_key(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }

        let event = Event::HostIntervalOpened {
            id: new.id,
            room_id: new.room_id,
            host_id: new.host_id,
            span: new.span,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(HostOpenInterval {
            id: new.id,
            room_id: new.room_id,
            host_id: new.host_id,
            span: new.span,
        })
    }

    pub async fn update_host_interval(
        &self,
        id: Ulid,
        patch: SpanPatch,
    ) -> Result<HostOpenInterval, EngineError> {
        let _permit = self.write_permit().await;
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard
            .host_intervals()
            .find(|w| w.id == id)
            .ok_or(EngineError::NotFound(id))?;

        let span = patch.apply(current.span)?;
        validate_span(&span)?;
        if patch.start.is_some() {
            require_future(&span, now_ms())?;
        }

        let event = Event::HostIntervalMoved { id, room_id, span };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(HostOpenInterval { span, ..current })
    }

    pub async fn close_interval(&self, id: Ulid) -> Result<HostOpenInterval, EngineError> {
        let _permit = self.write_permit().await;
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard
            .host_intervals()
            .find(|w| w.id == id)
            .ok_or(EngineError::NotFound(id))?;
        let event = Event::HostIntervalClosed { id, room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(current)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with just the events that recreate the current state.
    /// Writers are held off from the snapshot until the new log is in place.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.exclusive_write_permit().await;
        let mut events = Vec::new();
        for rs in self.rooms_in_order() {
            let guard = rs.read().await;
            let room_id = guard.id();
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            events.extend(
                guard
                    .images
                    .iter()
                    .map(|&id| Event::ImageAttached { id, room_id }),
            );
            for interval in &guard.intervals {
                events.push(match interval.kind {
                    IntervalKind::Guest { guest_id, host_id } => Event::ReservationPlaced {
                        id: interval.id,
                        room_id,
                        guest_id,
                        host_id,
                        span: interval.span,
                    },
                    IntervalKind::HostOpen { host_id } => Event::HostIntervalOpened {
                        id: interval.id,
                        room_id,
                        host_id,
                        span: interval.span,
                    },
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_control(WalControl::Compact { events, response: tx }, rx)
            .await?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        match self
            .wal_control(WalControl::AppendsSinceCompact { response: tx }, rx)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                warn!("cannot read WAL append count: {e}");
                0
            }
        }
    }
}
