//! Mock sink for unit and integration testing.
//!
//! Records every delivery attempt with its outcome and time, and fails on
//! demand.  Like the mock device capability it is a cheap handle around
//! shared state, so a test keeps one clone while the worker owns another.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use super::{Sink, SinkError};

/// What a recorded attempt tried to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Scan {
        device_id: String,
        text: String,
        timestamp: i64,
    },
    Heartbeat {
        relay_id: String,
        timestamp: i64,
    },
}

/// One call into the sink.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub delivery: Delivery,
    pub succeeded: bool,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureMode {
    Never,
    Next(usize),
    Always,
}

#[derive(Debug)]
struct MockState {
    scan_failures: FailureMode,
    heartbeat_failures: FailureMode,
    attempts: Vec<Attempt>,
}

impl FailureMode {
    /// Consumes one scripted failure; `true` means this call fails.
    fn take(&mut self) -> bool {
        match *self {
            Self::Never => false,
            Self::Always => true,
            Self::Next(0) => {
                *self = Self::Never;
                false
            }
            Self::Next(n) => {
                *self = Self::Next(n - 1);
                true
            }
        }
    }
}

/// A recording implementation of [`Sink`].
#[derive(Debug, Clone)]
pub struct MockSink {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSink {
    /// A sink that accepts everything.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                scan_failures: FailureMode::Never,
                heartbeat_failures: FailureMode::Never,
                attempts: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("lock poisoned")
    }

    /// Fails the next `count` scan deliveries, then succeeds.
    pub fn fail_next_scans(&self, count: usize) {
        self.state().scan_failures = FailureMode::Next(count);
    }

    /// Fails every scan delivery until [`recover`](Self::recover).
    pub fn fail_all_scans(&self) {
        self.state().scan_failures = FailureMode::Always;
    }

    pub fn fail_all_heartbeats(&self) {
        self.state().heartbeat_failures = FailureMode::Always;
    }

    pub fn recover(&self) {
        let mut state = self.state();
        state.scan_failures = FailureMode::Never;
        state.heartbeat_failures = FailureMode::Never;
    }

    /// Every attempt so far, in call order.
    pub fn attempts(&self) -> Vec<Attempt> {
        self.state().attempts.clone()
    }

    /// Scan attempts only.
    pub fn scan_attempts(&self) -> Vec<Attempt> {
        self.attempts()
            .into_iter()
            .filter(|a| matches!(a.delivery, Delivery::Scan { .. }))
            .collect()
    }

    /// Texts of successfully delivered scans, in delivery order.
    pub fn delivered_texts(&self) -> Vec<String> {
        self.attempts()
            .into_iter()
            .filter(|a| a.succeeded)
            .filter_map(|a| match a.delivery {
                Delivery::Scan { text, .. } => Some(text),
                Delivery::Heartbeat { .. } => None,
            })
            .collect()
    }

    pub fn heartbeat_attempts(&self) -> usize {
        self.attempts()
            .iter()
            .filter(|a| matches!(a.delivery, Delivery::Heartbeat { .. }))
            .count()
    }

    fn record(
        &self,
        delivery: Delivery,
        fails: impl FnOnce(&mut MockState) -> bool,
    ) -> Result<(), SinkError> {
        let mut state = self.state();
        let failed = fails(&mut state);
        state.attempts.push(Attempt {
            delivery,
            succeeded: !failed,
            at: Instant::now(),
        });
        if failed {
            Err(SinkError::Unavailable("scripted failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Sink for MockSink {
    fn send_scan(&mut self, device_id: &str, text: &str, timestamp: i64) -> Result<(), SinkError> {
        let delivery = Delivery::Scan {
            device_id: device_id.to_string(),
            text: text.to_string(),
            timestamp,
        };
        self.record(delivery, |state| state.scan_failures.take())
    }

    fn send_heartbeat(&mut self, relay_id: &str, timestamp: i64) -> Result<(), SinkError> {
        let delivery = Delivery::Heartbeat {
            relay_id: relay_id.to_string(),
            timestamp,
        };
        self.record(delivery, |state| state.heartbeat_failures.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_sink_records_successful_scan() {
        // Arrange
        let mut sink = MockSink::new();

        // Act
        sink.send_scan("d1", "123\n", 7).unwrap();

        // Assert
        let attempts = sink.attempts();
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].succeeded);
        assert_eq!(
            attempts[0].delivery,
            Delivery::Scan {
                device_id: "d1".to_string(),
                text: "123\n".to_string(),
                timestamp: 7
            }
        );
    }

    #[test]
    fn test_fail_next_scans_fails_exactly_n_times() {
        // Arrange
        let mut sink = MockSink::new();
        sink.fail_next_scans(2);

        // Act
        let results: Vec<bool> = (0..4).map(|_| sink.send_scan("d1", "x", 0).is_ok()).collect();

        // Assert
        assert_eq!(results, vec![false, false, true, true]);
    }

    #[test]
    fn test_fail_all_scans_until_recover() {
        let mut sink = MockSink::new();
        sink.fail_all_scans();
        assert!(sink.send_scan("d1", "x", 0).is_err());
        assert!(sink.send_scan("d1", "x", 0).is_err());

        sink.recover();

        assert!(sink.send_scan("d1", "x", 0).is_ok());
        assert_eq!(sink.delivered_texts(), vec!["x".to_string()]);
    }

    #[test]
    fn test_heartbeat_failures_do_not_affect_scans() {
        let mut sink = MockSink::new();
        sink.fail_all_heartbeats();

        assert!(sink.send_heartbeat("r", 0).is_err());
        assert!(sink.send_scan("d1", "x", 0).is_ok());
        assert_eq!(sink.heartbeat_attempts(), 1);
        assert_eq!(sink.scan_attempts().len(), 1);
    }

    #[test]
    fn test_clones_share_recorded_attempts() {
        let observer = MockSink::new();
        let mut worker = observer.clone();

        worker.send_heartbeat("r", 1).unwrap();

        assert_eq!(observer.heartbeat_attempts(), 1);
    }
}
