//! Timestamp text format shared by every table.
//!
//! RFC 3339, UTC, millisecond precision, `Z` suffix: `2026-10-17T09:30:00.000Z`.
//! Fixed width, so SQL string comparison orders timestamps correctly.

use chrono::{DateTime, SecondsFormat, Utc};

use super::errors::{QueueError, Result};

pub fn format(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| QueueError::StoreFailure(format!("invalid timestamp '{raw}': {e}")))
}

/// Drop sub-millisecond precision so values survive a round trip through the store.
pub fn truncate(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// `now - span`, clamped to the earliest representable instant instead of overflowing.
pub fn saturating_sub(now: DateTime<Utc>, span: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(span)
        .ok()
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
