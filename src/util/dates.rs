use chrono::{DateTime, NaiveDate, TimeZone, Utc};

/// Milliseconds since the Unix epoch, UTC.
pub type DateTs = i64;

pub const DAY_MILLIS: DateTs = 24 * 60 * 60 * 1000;

/// Current time as a timestamp
pub fn now() -> DateTs {
    Utc::now().timestamp_millis()
}

/// Truncate a timestamp to the start of its UTC day.
///
/// All sync range boundaries are quantized so that IMAP SEARCH SINCE/BEFORE,
/// which only have day granularity, line up with what we persist.
pub fn quantize_date(ts: DateTs) -> DateTs {
    ts - ts.rem_euclid(DAY_MILLIS)
}

/// The quantized day `days` days before `ts`
pub fn make_days_before(ts: DateTs, days: i64) -> DateTs {
    quantize_date(ts) - days * DAY_MILLIS
}

/// The quantized day `days` days before now. Negative values look forward.
pub fn make_days_ago(days: i64) -> DateTs {
    make_days_before(now(), days)
}

/// Timestamp for midnight UTC of a calendar date
pub fn date_to_ts(date: NaiveDate) -> DateTs {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| Utc.from_utc_datetime(&dt).timestamp_millis())
        .unwrap_or(0)
}

/// Convert a timestamp to a `DateTime<Utc>`, clamping invalid values to the epoch
pub fn ts_to_datetime(ts: DateTs) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts).unwrap_or_default()
}
