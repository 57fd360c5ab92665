//! Wall-clock millisecond helpers.
//!
//! LWW ordering and the wire protocol both use milliseconds since the Unix
//! epoch as signed 64-bit integers. Producers stamp entries with `now_ms()`;
//! the merge core only compares the values, it never samples time itself.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
