use tokio_test::{assert_err, assert_ok};

use super::conflict::{check_text, require_future, validate_span};
use super::*;
use crate::limits::*;

const H: Ms = 3_600_000; // 1 hour in ms
const D: Ms = 24 * H;

/// 2040-01-01T00:00:00Z, comfortably in the future for InPast checks.
const BASE: Ms = 2_208_988_800_000;

fn day(n: i64) -> Ms {
    BASE + n * D
}

fn span(start: Ms, end: Ms) -> Span {
    Span::new(start, end).unwrap()
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roombook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

/// Engine with one room. Returns (engine, room id, host id).
async fn engine_with_room(wal: &str) -> (Engine, Ulid, Ulid) {
    engine_with_room_at(&test_wal_path(wal)).await
}

async fn engine_with_room_at(path: &std::path::Path) -> (Engine, Ulid, Ulid) {
    let engine = Engine::new(path.to_path_buf()).unwrap();
    let host = Ulid::new();
    let room = Room::new(Ulid::new(), host, "Harbour flat");
    let id = room.id;
    engine.create_room(room).await.unwrap();
    (engine, id, host)
}

/// Fresh ids in ascending order, so catalog order is predictable.
fn ordered_ids<const N: usize>() -> [Ulid; N] {
    let mut ids = [(); N].map(|_| Ulid::new());
    ids.sort();
    ids
}

fn stay(room_id: Ulid, guest_id: Ulid, start: Ms, end: Ms) -> NewGuestReservation {
    NewGuestReservation {
        id: Ulid::new(),
        room_id,
        guest_id,
        span: span(start, end),
    }
}

fn window(room_id: Ulid, host_id: Ulid, start: Ms, end: Ms) -> NewHostInterval {
    NewHostInterval {
        id: Ulid::new(),
        room_id,
        host_id,
        span: span(start, end),
    }
}

// ── Rooms ────────────────────────────────────────────────

#[tokio::test]
async fn create_and_get_room() {
    let (engine, id, host) = engine_with_room("create_room.wal").await;
    let rs = engine.get_room(id).await.unwrap();
    assert_eq!(rs.room.host_id, host);
    assert_eq!(rs.room.title, "Harbour flat");
    assert!(rs.intervals.is_empty());
    assert_eq!(engine.room_count(), 1);
}

#[tokio::test]
async fn duplicate_room_rejected() {
    let engine = Engine::new(test_wal_path("dup_room.wal")).unwrap();
    let room = Room::new(Ulid::new(), Ulid::new(), "a");
    engine.create_room(room.clone()).await.unwrap();
    let result = engine.create_room(room).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn overlong_title_rejected() {
    let engine = Engine::new(test_wal_path("long_title.wal")).unwrap();
    let room = Room::new(Ulid::new(), Ulid::new(), "x".repeat(MAX_TITLE_LEN + 1));
    let result = engine.create_room(room).await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn update_room_merges_patch() {
    let (engine, id, _) = engine_with_room("update_room.wal").await;
    let patch = RoomPatch {
        location: Some("Lisbon".into()),
        rooms_count: Some(2),
        ..Default::default()
    };
    let room = engine.update_room(id, patch).await.unwrap();
    assert_eq!(room.title, "Harbour flat");
    assert_eq!(room.location.as_deref(), Some("Lisbon"));
    assert_eq!(room.rooms_count, Some(2));
    assert_eq!(engine.get_room(id).await.unwrap().room, room);
}

#[tokio::test]
async fn update_missing_room_is_not_found() {
    let engine = Engine::new(test_wal_path("update_missing.wal")).unwrap();
    let result = engine.update_room(Ulid::new(), RoomPatch::default()).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn only_host_deletes_room() {
    let (engine, id, host) = engine_with_room("delete_room.wal").await;
    let guest = Ulid::new();
    let r = engine.reserve(stay(id, guest, day(1), day(3))).await.unwrap();

    let result = engine.delete_room(id, guest).await;
    assert!(matches!(result, Err(EngineError::NotRoomHost { .. })));

    engine.delete_room(id, host).await.unwrap();
    assert!(engine.get_room(id).await.is_none());
    assert!(engine.get_room_for_entity(&r.id).is_none());
    assert!(matches!(
        engine.cancel_reservation(r.id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn images_attach_in_order_and_detach() {
    let (engine, id, _) = engine_with_room("images.wal").await;
    let first = Ulid::new();
    let second = Ulid::new();
    engine.attach_image(first, id).await.unwrap();
    engine.attach_image(second, id).await.unwrap();
    assert_eq!(engine.get_room(id).await.unwrap().images, vec![first, second]);

    assert_eq!(engine.detach_image(first).await.unwrap(), id);
    assert_eq!(engine.get_room(id).await.unwrap().images, vec![second]);
    assert!(matches!(
        engine.detach_image(first).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Guest reservations ───────────────────────────────────

#[tokio::test]
async fn reserve_then_overlap_conflicts() {
    let (engine, id, _) = engine_with_room("reserve_overlap.wal").await;
    let first = engine
        .reserve(stay(id, Ulid::new(), day(10), day(15)))
        .await
        .unwrap();

    let result = engine.reserve(stay(id, Ulid::new(), day(12), day(13))).await;
    match result {
        Err(EngineError::BookingConflict { room_id, reason }) => {
            assert_eq!(room_id, id);
            assert_eq!(reason, Decision::Conflict(first.id));
        }
        other => panic!("expected BookingConflict, got {other:?}"),
    }
}

#[tokio::test]
async fn back_to_back_stays_both_succeed() {
    let (engine, id, _) = engine_with_room("back_to_back.wal").await;
    assert_ok!(engine.reserve(stay(id, Ulid::new(), day(10), day(15))).await);
    assert_ok!(engine.reserve(stay(id, Ulid::new(), day(15), day(20))).await);
    assert_ok!(engine.reserve(stay(id, Ulid::new(), day(5), day(10))).await);
    assert_eq!(
        engine.get_reservations(ReservationScope::Room(id)).await.len(),
        3
    );
}

#[tokio::test]
async fn reservation_record_carries_host() {
    let (engine, id, host) = engine_with_room("record_host.wal").await;
    let guest = Ulid::new();
    let r = engine.reserve(stay(id, guest, day(1), day(2))).await.unwrap();
    assert_eq!(r.room_id, id);
    assert_eq!(r.guest_id, guest);
    assert_eq!(r.host_id, host);
}

#[tokio::test]
async fn host_closed_dates_refuse_booking() {
    let (engine, id, host) = engine_with_room("host_closed.wal").await;
    engine
        .open_interval(window(id, host, day(1), day(10)))
        .await
        .unwrap();

    let result = engine.reserve(stay(id, Ulid::new(), day(8), day(12))).await;
    assert!(matches!(
        result,
        Err(EngineError::BookingConflict {
            reason: Decision::HostClosed,
            ..
        })
    ));
    assert_ok!(engine.reserve(stay(id, Ulid::new(), day(2), day(10))).await);
}

#[tokio::test]
async fn host_cannot_book_own_room() {
    let (engine, id, host) = engine_with_room("own_room.wal").await;
    let result = engine.reserve(stay(id, host, day(1), day(2))).await;
    assert!(matches!(result, Err(EngineError::OwnRoom(r)) if r == id));
}

#[tokio::test]
async fn reserve_missing_room_is_not_found() {
    let engine = Engine::new(test_wal_path("reserve_missing.wal")).unwrap();
    let result = engine
        .reserve(stay(Ulid::new(), Ulid::new(), day(1), day(2)))
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn past_stays_rejected() {
    let (engine, id, _) = engine_with_room("in_past.wal").await;
    let result = engine
        .reserve(stay(id, Ulid::new(), 1_000_000, 2_000_000))
        .await;
    assert!(matches!(result, Err(EngineError::InPast(1_000_000))));
}

#[tokio::test]
async fn duplicate_reservation_id_rejected() {
    let (engine, id, _) = engine_with_room("dup_reservation.wal").await;
    let new = stay(id, Ulid::new(), day(1), day(2));
    engine.reserve(new).await.unwrap();
    let again = NewGuestReservation {
        span: span(day(5), day(6)),
        ..new
    };
    assert!(matches!(
        engine.reserve(again).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn move_reservation_ignores_itself() {
    let (engine, id, _) = engine_with_room("move_self.wal").await;
    let r = engine
        .reserve(stay(id, Ulid::new(), day(10), day(15)))
        .await
        .unwrap();

    // Extending over its own current dates is fine.
    let patch = SpanPatch {
        start: None,
        end: Some(day(17)),
    };
    let moved = engine.update_reservation(r.id, patch).await.unwrap();
    assert_eq!(moved.span, span(day(10), day(17)));
    assert_eq!(moved.guest_id, r.guest_id);
}

#[tokio::test]
async fn move_reservation_into_another_conflicts() {
    let (engine, id, _) = engine_with_room("move_conflict.wal").await;
    let a = engine
        .reserve(stay(id, Ulid::new(), day(10), day(15)))
        .await
        .unwrap();
    let b = engine
        .reserve(stay(id, Ulid::new(), day(20), day(25)))
        .await
        .unwrap();

    let patch = SpanPatch {
        start: Some(day(14)),
        end: None,
    };
    let result = engine.update_reservation(b.id, patch).await;
    assert!(matches!(
        result,
        Err(EngineError::BookingConflict {
            reason: Decision::Conflict(other),
            ..
        }) if other == a.id
    ));
    // Unchanged after the refusal.
    let stored = engine.get_reservations(ReservationScope::Room(id)).await;
    assert_eq!(stored[1].span, span(day(20), day(25)));
}

#[tokio::test]
async fn move_reservation_to_inverted_range_rejected() {
    let (engine, id, _) = engine_with_room("move_inverted.wal").await;
    let r = engine
        .reserve(stay(id, Ulid::new(), day(10), day(15)))
        .await
        .unwrap();
    let patch = SpanPatch {
        start: Some(day(20)),
        end: None,
    };
    assert!(matches!(
        engine.update_reservation(r.id, patch).await,
        Err(EngineError::InvalidRange { .. })
    ));
}

#[tokio::test]
async fn cancel_frees_the_dates() {
    let (engine, id, _) = engine_with_room("cancel.wal").await;
    let r = engine
        .reserve(stay(id, Ulid::new(), day(10), day(15)))
        .await
        .unwrap();
    assert!(!engine.is_available(id, day(11), day(12)).await.unwrap());

    let cancelled = engine.cancel_reservation(r.id).await.unwrap();
    assert_eq!(cancelled, r);
    assert!(engine.is_available(id, day(11), day(12)).await.unwrap());
    assert_err!(engine.cancel_reservation(r.id).await);
}

#[tokio::test]
async fn concurrent_overlapping_reservations_one_wins() {
    let (engine, id, _) = engine_with_room("concurrent.wal").await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .reserve(stay(id, Ulid::new(), day(10) + i * H, day(12) + i * H))
                .await
        }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::BookingConflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 15);
    assert_eq!(
        engine.get_reservations(ReservationScope::Room(id)).await.len(),
        1
    );
}

// ── Host windows ─────────────────────────────────────────

#[tokio::test]
async fn only_host_opens_windows() {
    let (engine, id, _) = engine_with_room("open_not_host.wal").await;
    let stranger = Ulid::new();
    let result = engine
        .open_interval(window(id, stranger, day(1), day(5)))
        .await;
    assert!(matches!(
        result,
        Err(EngineError::NotRoomHost { room_id, user_id }) if room_id == id && user_id == stranger
    ));
}

#[tokio::test]
async fn closing_last_window_reopens_room() {
    let (engine, id, host) = engine_with_room("close_window.wal").await;
    let w = engine
        .open_interval(window(id, host, day(1), day(5)))
        .await
        .unwrap();
    assert_eq!(
        engine.check_availability(id, day(6), day(7)).await.unwrap(),
        Decision::HostClosed
    );

    engine.close_interval(w.id).await.unwrap();
    assert_eq!(
        engine.check_availability(id, day(6), day(7)).await.unwrap(),
        Decision::Available
    );
}

#[tokio::test]
async fn moving_window_does_not_touch_bookings() {
    let (engine, id, host) = engine_with_room("move_window.wal").await;
    let w = engine
        .open_interval(window(id, host, day(1), day(10)))
        .await
        .unwrap();
    let r = engine
        .reserve(stay(id, Ulid::new(), day(2), day(4)))
        .await
        .unwrap();

    let patch = SpanPatch {
        start: Some(day(5)),
        end: None,
    };
    let moved = engine.update_host_interval(w.id, patch).await.unwrap();
    assert_eq!(moved.span, span(day(5), day(10)));
    assert_eq!(
        engine.get_reservations(ReservationScope::Room(id)).await,
        vec![r]
    );
    assert_eq!(
        engine.check_availability(id, day(2), day(4)).await.unwrap(),
        Decision::Conflict(r.id)
    );
}

#[tokio::test]
async fn window_and_reservation_ids_are_not_interchangeable() {
    let (engine, id, host) = engine_with_room("kind_mismatch.wal").await;
    let w = engine
        .open_interval(window(id, host, day(1), day(10)))
        .await
        .unwrap();
    assert!(matches!(
        engine.cancel_reservation(w.id).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn check_availability_validates_range_first() {
    let engine = Engine::new(test_wal_path("avail_range.wal")).unwrap();
    let result = engine.check_availability(Ulid::new(), day(5), day(5)).await;
    assert!(matches!(result, Err(EngineError::InvalidRange { .. })));
    let result = engine.check_availability(Ulid::new(), day(5), day(6)).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn listings_by_scope() {
    let engine = Engine::new(test_wal_path("listings.wal")).unwrap();
    let host_a = Ulid::new();
    let host_b = Ulid::new();
    let [a_id, b_id] = ordered_ids();
    let room_a = Room::new(a_id, host_a, "a");
    let room_b = Room::new(b_id, host_b, "b");
    let (a, b) = (room_a.id, room_b.id);
    engine.create_room(room_a).await.unwrap();
    engine.create_room(room_b).await.unwrap();

    let guest = Ulid::new();
    let r1 = engine.reserve(stay(a, guest, day(5), day(6))).await.unwrap();
    let r0 = engine.reserve(stay(a, Ulid::new(), day(1), day(2))).await.unwrap();
    let r2 = engine.reserve(stay(b, guest, day(1), day(2))).await.unwrap();
    let w = engine.open_interval(window(b, host_b, day(0) + H, day(30))).await.unwrap();

    assert_eq!(
        engine.get_reservations(ReservationScope::Room(a)).await,
        vec![r0, r1]
    );
    assert_eq!(
        engine.get_reservations(ReservationScope::Guest(guest)).await,
        vec![r1, r2]
    );
    assert_eq!(
        engine.get_reservations(ReservationScope::Host(host_b)).await,
        vec![r2]
    );
    assert_eq!(
        engine.get_host_intervals(HostIntervalScope::Host(host_b)).await,
        vec![w]
    );
    assert!(engine.get_host_intervals(HostIntervalScope::Room(a)).await.is_empty());

    let titles: Vec<String> = engine.list_rooms().await.into_iter().map(|r| r.title).collect();
    assert_eq!(titles, vec!["a", "b"]);
}

#[tokio::test]
async fn search_narrows_by_dates_and_attributes() {
    let engine = Engine::new(test_wal_path("search.wal")).unwrap();
    let [flat_id, loft_id, cabin_id] = ordered_ids();
    let mut flat = Room::new(flat_id, Ulid::new(), "Harbour flat");
    flat.location = Some("Lisbon".into());
    flat.room_type = Some("Apartment".into());
    let mut loft = Room::new(loft_id, Ulid::new(), "Loft");
    loft.location = Some("lisbon centre".into());
    loft.room_type = Some("Apartment".into());
    let mut cabin = Room::new(cabin_id, Ulid::new(), "Cabin");
    cabin.location = Some("Sintra".into());
    engine.create_room(flat).await.unwrap();
    engine.create_room(loft).await.unwrap();
    engine.create_room(cabin).await.unwrap();
    engine
        .reserve(stay(flat_id, Ulid::new(), day(10), day(15)))
        .await
        .unwrap();

    let by_location = RoomFilter {
        structure: StructuralFilter {
            location: Some("LISBON".into()),
            ..Default::default()
        },
        ..Default::default()
    };
    let ids: Vec<Ulid> = engine.search(&by_location).await.unwrap().iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![flat_id, loft_id]);

    let with_dates = RoomFilter {
        check_in: Some(day(12)),
        check_out: Some(day(13)),
        ..by_location.clone()
    };
    let ids: Vec<Ulid> = engine.search(&with_dates).await.unwrap().iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![loft_id]);

    assert_eq!(engine.search(&RoomFilter::default()).await.unwrap().len(), 3);
}

#[tokio::test]
async fn ledger_trait_guards_writes() {
    let (engine, id, host) = engine_with_room("ledger.wal").await;
    let ledger: &dyn ReservationLedger = &engine;
    ledger
        .insert_host_interval(window(id, host, day(1), day(20)))
        .await
        .unwrap();
    ledger
        .insert_guest_reservation(stay(id, Ulid::new(), day(2), day(4)))
        .await
        .unwrap();
    let result = ledger
        .insert_guest_reservation(stay(id, Ulid::new(), day(3), day(5)))
        .await;
    assert!(matches!(result, Err(EngineError::BookingConflict { .. })));

    let catalog: &dyn RoomCatalog = &engine;
    let rs = catalog.load_room(id).await.unwrap();
    assert_eq!(rs.intervals.len(), 2);
}

// ── Validation helpers ───────────────────────────────────

#[test]
fn span_bounds() {
    assert_ok!(validate_span(&span(day(0), day(7))));
    assert!(matches!(
        validate_span(&span(-5, 10)),
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        validate_span(&span(day(0), MAX_VALID_TIMESTAMP_MS + 1)),
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        validate_span(&span(day(0), day(0) + MAX_SPAN_DURATION_MS + 1)),
        Err(EngineError::LimitExceeded("span too wide"))
    ));
}

#[test]
fn future_check_is_strict() {
    assert_ok!(require_future(&span(101, 200), 100));
    assert!(matches!(
        require_future(&span(100, 200), 100),
        Err(EngineError::InPast(100))
    ));
}

#[test]
fn text_limits() {
    assert_ok!(check_text(None, 3, "x"));
    assert_ok!(check_text(Some("abc"), 3, "x"));
    assert_err!(check_text(Some("abcd"), 3, "x"));
}

#[test]
fn error_messages() {
    let room_id = Ulid::new();
    let other = Ulid::new();
    let conflict = EngineError::BookingConflict {
        room_id,
        reason: Decision::Conflict(other),
    };
    assert!(conflict.to_string().contains(&other.to_string()));
    assert!(conflict.is_client_error());
    assert!(!EngineError::WalError("disk".into()).is_client_error());
}

// ── WAL ──────────────────────────────────────────────────

#[tokio::test]
async fn replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let host = Ulid::new();
    let room_id;
    let kept;
    let image = Ulid::new();
    {
        let engine = Engine::new(path.clone()).unwrap();
        let room = Room::new(Ulid::new(), host, "Replayed");
        room_id = room.id;
        engine.create_room(room).await.unwrap();
        engine.attach_image(image, room_id).await.unwrap();
        engine
            .open_interval(window(room_id, host, day(1), day(30)))
            .await
            .unwrap();
        kept = engine
            .reserve(stay(room_id, Ulid::new(), day(2), day(4)))
            .await
            .unwrap();
        let dropped = engine
            .reserve(stay(room_id, Ulid::new(), day(6), day(8)))
            .await
            .unwrap();
        engine.cancel_reservation(dropped.id).await.unwrap();
        engine
            .update_reservation(
                kept.id,
                SpanPatch {
                    start: None,
                    end: Some(day(5)),
                },
            )
            .await
            .unwrap();
    }

    let engine = Engine::new(path).unwrap();
    let rs = engine.get_room(room_id).await.unwrap();
    assert_eq!(rs.room.title, "Replayed");
    assert_eq!(rs.images, vec![image]);
    let reservations: Vec<_> = rs.guest_reservations().collect();
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0].id, kept.id);
    assert_eq!(reservations[0].span, span(day(2), day(5)));
    assert_eq!(rs.host_intervals().count(), 1);
    assert_eq!(engine.get_room_for_entity(&kept.id), Some(room_id));
}

#[tokio::test]
async fn replay_after_room_deletion() {
    let path = test_wal_path("replay_delete.wal");
    let room_id;
    let reservation;
    {
        let (engine, id, host) = engine_with_room_at(&path).await;
        room_id = id;
        reservation = engine
            .reserve(stay(id, Ulid::new(), day(1), day(2)))
            .await
            .unwrap();
        engine.delete_room(id, host).await.unwrap();
    }

    let engine = Engine::new(path).unwrap();
    assert!(engine.get_room(room_id).await.is_none());
    assert!(engine.get_room_for_entity(&reservation.id).is_none());
    assert_eq!(engine.room_count(), 0);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact.wal");
    let room_id;
    let before;
    {
        let (engine, id, host) = engine_with_room_at(&path).await;
        room_id = id;
        for i in 0..10 {
            let r = engine
                .reserve(stay(id, Ulid::new(), day(i * 2), day(i * 2 + 1)))
                .await
                .unwrap();
            if i % 2 == 0 {
                engine.cancel_reservation(r.id).await.unwrap();
            }
        }
        engine
            .open_interval(window(id, host, day(0) + H, day(40)))
            .await
            .unwrap();
        assert!(engine.wal_appends_since_compact().await > 0);

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        before = engine.get_room(id).await.unwrap();
    }

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.get_room(room_id).await.unwrap(), before);
    assert_eq!(before.guest_reservations().count(), 5);
}

#[tokio::test]
async fn bookings_after_torn_tail_survive_next_restart() {
    use std::io::Write;

    let path = test_wal_path("torn_restart.wal");
    let room_id;
    {
        let (_engine, id, _) = engine_with_room_at(&path).await;
        room_id = id;
    }
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[40u8, 0, 0, 0, 1, 2, 3]).unwrap();
    }

    let booked = {
        let engine = Engine::new(path.clone()).unwrap();
        engine
            .reserve(stay(room_id, Ulid::new(), day(1), day(2)))
            .await
            .unwrap()
    };

    let engine = Engine::new(path).unwrap();
    assert_eq!(
        engine.get_reservations(ReservationScope::Room(room_id)).await,
        vec![booked]
    );
}

// ── Races ────────────────────────────────────────────────

const SETTLE: std::time::Duration = std::time::Duration::from_millis(20);

#[tokio::test]
async fn writers_queued_behind_delete_find_room_gone() {
    let path = test_wal_path("delete_race.wal");
    let (engine, id, host) = engine_with_room_at(&path).await;
    let engine = Arc::new(engine);

    // Hold the room so the delete and every writer queue on its lock, in
    // that order.
    let held = engine.get_room_state(&id).unwrap().write_owned().await;
    let deleting = tokio::spawn({
        let engine = engine.clone();
        async move { engine.delete_room(id, host).await }
    });
    tokio::time::sleep(SETTLE).await;

    let reservation = stay(id, Ulid::new(), day(1), day(2));
    let reserving = tokio::spawn({
        let engine = engine.clone();
        async move { engine.reserve(reservation).await }
    });
    let opening = tokio::spawn({
        let engine = engine.clone();
        async move { engine.open_interval(window(id, host, day(1), day(9))).await }
    });
    let image = Ulid::new();
    let attaching = tokio::spawn({
        let engine = engine.clone();
        async move { engine.attach_image(image, id).await }
    });
    let renaming = tokio::spawn({
        let engine = engine.clone();
        async move {
            let patch = RoomPatch {
                title: Some("Renamed".into()),
                ..Default::default()
            };
            engine.update_room(id, patch).await
        }
    });
    tokio::time::sleep(SETTLE).await;
    drop(held);

    assert_ok!(deleting.await.unwrap());
    assert!(matches!(reserving.await.unwrap(), Err(EngineError::NotFound(r)) if r == id));
    assert!(matches!(opening.await.unwrap(), Err(EngineError::NotFound(_))));
    assert!(matches!(attaching.await.unwrap(), Err(EngineError::NotFound(_))));
    assert!(matches!(renaming.await.unwrap(), Err(EngineError::NotFound(_))));
    assert!(engine.get_room_for_entity(&reservation.id).is_none());
    assert!(engine.get_room_for_entity(&image).is_none());
    assert_eq!(engine.room_count(), 0);

    drop(engine);
    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.room_count(), 0);
}

#[tokio::test]
async fn writes_during_compaction_survive_restart() {
    let path = test_wal_path("compact_race.wal");
    let [a, b] = ordered_ids::<2>();
    let host = Ulid::new();
    let engine = Arc::new(Engine::new(path.clone()).unwrap());
    engine.create_room(Room::new(a, host, "A")).await.unwrap();
    engine.create_room(Room::new(b, host, "B")).await.unwrap();

    // Compaction snapshots A, then stalls on B while a booking for A arrives.
    let held = engine.get_room_state(&b).unwrap().write_owned().await;
    let compacting = tokio::spawn({
        let engine = engine.clone();
        async move { engine.compact_wal().await }
    });
    tokio::time::sleep(SETTLE).await;
    let booking = tokio::spawn({
        let engine = engine.clone();
        async move { engine.reserve(stay(a, Ulid::new(), day(1), day(2))).await }
    });
    tokio::time::sleep(SETTLE).await;
    drop(held);

    assert_ok!(compacting.await.unwrap());
    let booked = booking.await.unwrap().unwrap();
    assert_eq!(
        engine.get_reservations(ReservationScope::Room(a)).await,
        vec![booked]
    );

    drop(engine);
    let engine = Engine::new(path).unwrap();
    assert_eq!(
        engine.get_reservations(ReservationScope::Room(a)).await,
        vec![booked]
    );
    assert_eq!(engine.room_count(), 2);
}

#[tokio::test]
async fn dead_wal_writer_fails_writes_and_compaction() {
    let (wal_tx, wal_rx) = mpsc::channel(1);
    drop(wal_rx);
    let engine = Engine {
        rooms: DashMap::new(),
        wal_tx,
        entity_to_room: DashMap::new(),
        write_gate: RwLock::new(()),
    };

    assert_eq!(engine.wal_appends_since_compact().await, 0);
    assert!(!crate::compactor::compact_if_due(&engine, 0).await);
    let room = Room::new(Ulid::new(), Ulid::new(), "Unwritable");
    assert!(matches!(
        engine.create_room(room).await,
        Err(EngineError::WalError(_))
    ));
    assert_eq!(engine.room_count(), 0);
}
