use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

pub const MAX_ROOMS: usize = 100_000;
pub const MAX_INTERVALS_PER_ROOM: usize = 10_000;
pub const MAX_IMAGES_PER_ROOM: usize = 64;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_TEXT_LEN: usize = 4_096;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Longest single stay or host window.
pub const MAX_SPAN_DURATION_MS: Ms = 3 * 366 * DAY_MS;

pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1_000;
