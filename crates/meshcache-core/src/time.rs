use time::OffsetDateTime;

/// Milliseconds since the Unix epoch, as carried in every event's `timestamp`.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}
