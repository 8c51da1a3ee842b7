use chrono::{DateTime, Utc};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn to_ms(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// `None` when the stored value is outside chrono's representable range.
pub fn from_ms(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}
