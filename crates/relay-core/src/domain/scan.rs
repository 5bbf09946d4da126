//! Events flowing through the relay: raw key events in, scan and heartbeat
//! records out.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A single key transition reported by a capture backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawKeyEvent {
    /// Backend-specific key code (Linux input-event code on evdev).
    pub code: u16,
    /// `true` for a key-down transition; key-up and auto-repeat are `false`.
    pub is_key_down: bool,
}

impl RawKeyEvent {
    pub fn key_down(code: u16) -> Self {
        Self {
            code,
            is_key_down: true,
        }
    }

    pub fn key_up(code: u16) -> Self {
        Self {
            code,
            is_key_down: false,
        }
    }
}

/// One fully framed barcode read.
///
/// Created by a [`ScanFramer`](crate::ScanFramer) with `sequence == 0`; the
/// relay queue stamps the real sequence number when the event is enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEvent {
    /// Configured id of the device that produced the scan.
    pub device_id: String,
    /// The complete buffer content, terminator included.
    pub text: String,
    /// Capture time in seconds since the Unix epoch.
    pub timestamp: i64,
    /// Monotonic enqueue order across all producers.
    pub sequence: u64,
}

impl ScanEvent {
    pub fn new(device_id: impl Into<String>, text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            device_id: device_id.into(),
            text: text.into(),
            timestamp,
            sequence: 0,
        }
    }
}

/// Liveness record sent directly to the sink, never queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    #[serde(rename = "relay")]
    pub relay_id: String,
    #[serde(rename = "ts")]
    pub timestamp: i64,
}

impl HeartbeatMessage {
    /// Builds a heartbeat stamped with the current time.
    pub fn now(relay_id: impl Into<String>) -> Self {
        Self {
            relay_id: relay_id.into(),
            timestamp: unix_timestamp(),
        }
    }
}

/// Returns the current time as whole seconds since the Unix epoch.
///
/// A clock set before 1970 yields 0 rather than panicking.
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_event_new_starts_unsequenced() {
        let event = ScanEvent::new("front-desk", "12345\n", 1_700_000_000);
        assert_eq!(event.device_id, "front-desk");
        assert_eq!(event.text, "12345\n");
        assert_eq!(event.sequence, 0);
    }

    #[test]
    fn test_raw_key_event_constructors_set_direction() {
        assert!(RawKeyEvent::key_down(2).is_key_down);
        assert!(!RawKeyEvent::key_up(2).is_key_down);
    }

    #[test]
    fn test_unix_timestamp_is_after_2020() {
        assert!(unix_timestamp() > 1_577_836_800);
    }
}
