//! Shared storage helper functions.
//!
//! Timestamp and flag encoding used across backend implementations.

use chrono::{DateTime, SecondsFormat, Utc};

use super::{Result, StorageError};

/// Render a timestamp for storage.
///
/// Fixed-width RFC 3339 with microseconds and a `Z` suffix, so the TEXT
/// column sorts chronologically under lexicographic ORDER BY.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidRow(format!("bad timestamp {raw:?}: {e}")))
}

/// Render an optional timestamp.
pub fn fmt_ts_opt(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(fmt_ts)
}

/// Parse an optional stored timestamp.
pub fn parse_ts_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}
