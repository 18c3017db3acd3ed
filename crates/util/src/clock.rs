use time::OffsetDateTime;

/// Milliseconds since the Unix epoch, as stored in every `ctime`/`mtime`
/// column.
pub fn now_ms() -> i64 {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis).unwrap_or(i64::MAX)
}
