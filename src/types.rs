// Session Watch Type Definitions
//
// Shared aliases and small helpers used throughout the crate.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::session::Session;

/// Opaque platform session id (logind session name, WTS session number, ...)
pub type SessionId = String;

/// Unix timestamp in seconds
pub type Timestamp = u64;

/// Shared handle to a tracked session
pub type SharedSession = Arc<Session>;

/// First uid handed out to regular (non system) accounts
pub const FIRST_REGULAR_UID: u32 = 1000;

/// Get current Unix timestamp in seconds
pub fn current_timestamp() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Render a boolean the way session properties expose it
pub fn flag(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_timestamp_is_recent() {
        // 2023-11-14, well before any machine running these tests
        assert!(current_timestamp() > 1_700_000_000);
    }

    #[test]
    fn test_flag_rendering() {
        assert_eq!(flag(true), "true");
        assert_eq!(flag(false), "false");
    }
}
