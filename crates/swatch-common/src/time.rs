//! Wall-clock helpers for wire-visible timestamps.
//!
//! Internal liveness math uses `std::time::Instant`; only timestamps that
//! leave the process (event `at` fields, clock snapshots) use epoch millis.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
