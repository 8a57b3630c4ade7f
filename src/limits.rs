use crate::model::Ms;

pub const MAX_ACCOUNTS: usize = 10_000;
pub const MAX_ACCOUNT_ID_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CUSTOMER_FIELD_LEN: usize = 256;
pub const MAX_ACTOR_LEN: usize = 256;

/// Widest availability query, in calendar days (inclusive range).
pub const MAX_QUERY_DAYS: i64 = 366;

pub const MAX_DURATION_MINUTES: u32 = 24 * 60;
pub const MAX_SLOTS_PER_DAY: usize = 48;
pub const MAX_BLACKOUTS: usize = 500;
pub const MAX_SERVICES: usize = 500;
pub const MAX_MESSAGE_LEN: usize = 8 * 1024;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
