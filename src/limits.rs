use crate::model::Ms;

/// Earliest accepted timestamp (2000-01-01T00:00:00Z).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// Latest accepted timestamp (2100-01-01T00:00:00Z).
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MAX_TITLE_LEN: usize = 512;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_GROUP_LEN: usize = 128;

pub const MAX_DATES_PER_OCCASION: usize = 366;
pub const MAX_OCCASIONS_PER_PERIOD: usize = 20_000;
pub const MAX_BOOKINGS_PER_OCCASION: usize = 10_000;

/// One day of transfer time is already more than any real schedule needs.
pub const MAX_MINUTES_BETWEEN: u32 = 24 * 60;
