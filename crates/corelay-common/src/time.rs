//! ---
//! corelay_section: "01-core-functionality"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Wall-clock helpers for record timestamps."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a timestamp into epoch milliseconds.
pub fn to_epoch_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Convert epoch milliseconds back into a timestamp, `None` when out of range.
pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Convert a duration into milliseconds, saturating at `i64::MAX`.
pub fn duration_to_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
