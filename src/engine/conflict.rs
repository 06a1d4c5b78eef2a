use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::resolve_excluding;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Bounds every stored span must satisfy.
pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// New reservations and host windows must start after `now`.
pub(crate) fn require_future(span: &Span, now: Ms) -> Result<(), EngineError> {
    if span.start <= now {
        return Err(EngineError::InPast(span.start));
    }
    Ok(())
}

/// Write-time guard. Callers hold the room's write lock, so the decision
/// cannot go stale before the event is applied.
pub(crate) fn check_bookable(
    rs: &RoomState,
    span: &Span,
    moving: Option<Ulid>,
) -> Result<(), EngineError> {
    let decision = resolve_excluding(rs, span, moving);
    if decision.is_available() {
        return Ok(());
    }
    metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
    Err(EngineError::BookingConflict {
        room_id: rs.id(),
        reason: decision,
    })
}

pub(crate) fn check_text(value: Option<&str>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}
