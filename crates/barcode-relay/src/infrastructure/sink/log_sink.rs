//! Log-only sink.
//!
//! Useful for commissioning a site before the real message broker exists:
//! every delivery is written to the log at info level and reported as
//! successful.

use tracing::info;

use super::{Sink, SinkError};
use crate::application::display_code;

#[derive(Debug, Clone)]
pub struct LogSink {
    relay_id: String,
}

impl LogSink {
    pub fn new(relay_id: impl Into<String>) -> Self {
        Self {
            relay_id: relay_id.into(),
        }
    }
}

impl Sink for LogSink {
    fn send_scan(&mut self, device_id: &str, text: &str, timestamp: i64) -> Result<(), SinkError> {
        info!(
            relay = %self.relay_id,
            device = %device_id,
            code = %display_code(text),
            ts = timestamp,
            "scan"
        );
        Ok(())
    }

    fn send_heartbeat(&mut self, relay_id: &str, timestamp: i64) -> Result<(), SinkError> {
        info!(relay = %relay_id, ts = timestamp, "heartbeat");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_sink_always_succeeds() {
        let mut sink = LogSink::new("relay-1");
        assert!(sink.send_scan("d1", "12345\n", 1_700_000_000).is_ok());
        assert!(sink.send_heartbeat("relay-1", 1_700_000_000).is_ok());
    }
}
