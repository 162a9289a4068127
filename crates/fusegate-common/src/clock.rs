use chrono::{DateTime, Utc};

/// 2023-10-01T00:00:00Z. All event offsets are microseconds since this
/// instant, which keeps scores well inside 63 bits while staying sortable.
pub const EPOCH_UNIX_SECONDS: i64 = 1_696_118_400;

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Microseconds elapsed since the fixed epoch.
pub fn now_micros() -> i64 {
    micros_at(Utc::now())
}

/// Wall-clock unix seconds, used to bucket the per-second global counters.
pub fn now_seconds() -> i64 {
    Utc::now().timestamp()
}

/// Offset of an arbitrary instant, for tests and the expiry sweeper.
pub fn micros_at(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_micros() - EPOCH_UNIX_SECONDS * MICROS_PER_SECOND
}
