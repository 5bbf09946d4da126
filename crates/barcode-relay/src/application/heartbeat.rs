//! HeartbeatEmitter: periodic liveness signal to the sink.
//!
//! The emitter runs on its own thread with its own sink instance and its own
//! stop handle, so it keeps beating while scan delivery is stuck in a retry
//! backoff and it can be stopped independently of the pipeline.
//!
//! A failed heartbeat is logged and dropped; the next one goes out on the
//! regular schedule.
//!
//! ```text
//!   Idle ──start()──► Running ──stop()──► Stopped
//!     └──────────────stop()───────────────────┘
//! ```

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use relay_core::{stop_channel, HeartbeatMessage, StopHandle, StopSignal};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Span};

use super::panic_message;
use crate::infrastructure::sink::Sink;

#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("heartbeat emitter is already running")]
    AlreadyStarted,

    #[error("heartbeat emitter has been stopped and cannot be restarted")]
    AlreadyStopped,

    #[error("failed to spawn the heartbeat thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Lifecycle of a [`HeartbeatEmitter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Idle,
    Running,
    Stopped,
}

/// Owns the heartbeat worker thread.
pub struct HeartbeatEmitter {
    relay_id: String,
    interval: Duration,
    sink: Option<Box<dyn Sink>>,
    state: HeartbeatState,
    stop: Option<StopHandle>,
    worker: Option<JoinHandle<()>>,
}

impl HeartbeatEmitter {
    pub fn new(relay_id: impl Into<String>, interval: Duration, sink: Box<dyn Sink>) -> Self {
        Self {
            relay_id: relay_id.into(),
            interval,
            sink: Some(sink),
            state: HeartbeatState::Idle,
            stop: None,
            worker: None,
        }
    }

    pub fn state(&self) -> HeartbeatState {
        self.state
    }

    /// Spawns the `relay-heartbeat` thread.  The first heartbeat goes out one
    /// interval after start.
    ///
    /// # Errors
    ///
    /// [`HeartbeatError::AlreadyStarted`] or [`HeartbeatError::AlreadyStopped`]
    /// unless the emitter is `Idle`; [`HeartbeatError::Spawn`] if the thread
    /// cannot be created, which leaves the emitter `Stopped`.
    pub fn start(&mut self) -> Result<(), HeartbeatError> {
        match self.state {
            HeartbeatState::Idle => {}
            HeartbeatState::Running => return Err(HeartbeatError::AlreadyStarted),
            HeartbeatState::Stopped => return Err(HeartbeatError::AlreadyStopped),
        }
        let Some(sink) = self.sink.take() else {
            return Err(HeartbeatError::AlreadyStopped);
        };

        let (handle, signal) = stop_channel();
        let worker = HeartbeatWorker {
            relay_id: self.relay_id.clone(),
            interval: self.interval,
            sink,
            stop: signal,
            span: info_span!("heartbeat"),
        };
        let spawned = thread::Builder::new()
            .name("relay-heartbeat".to_string())
            .spawn(move || worker.run());

        match spawned {
            Ok(join) => {
                self.stop = Some(handle);
                self.worker = Some(join);
                self.state = HeartbeatState::Running;
                Ok(())
            }
            Err(e) => {
                self.state = HeartbeatState::Stopped;
                Err(HeartbeatError::Spawn(e))
            }
        }
    }

    /// Stops the worker and waits for it to exit.  Idempotent; a panicked
    /// worker is logged, not propagated.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.stop();
        }
        if let Some(worker) = self.worker.take() {
            if let Err(payload) = worker.join() {
                error!("heartbeat worker panicked: {}", panic_message(payload.as_ref()));
            }
        }
        self.sink = None;
        self.state = HeartbeatState::Stopped;
    }
}

impl Drop for HeartbeatEmitter {
    fn drop(&mut self) {
        self.stop();
    }
}

struct HeartbeatWorker {
    relay_id: String,
    interval: Duration,
    sink: Box<dyn Sink>,
    stop: StopSignal,
    span: Span,
}

impl HeartbeatWorker {
    fn run(mut self) {
        let span = self.span.clone();
        let _enter = span.enter();
        info!(
            relay = %self.relay_id,
            interval_ms = self.interval.as_millis() as u64,
            "heartbeat started"
        );

        while !self.stop.wait(self.interval) {
            let message = HeartbeatMessage::now(self.relay_id.as_str());
            match self.sink.send_heartbeat(&message.relay_id, message.timestamp) {
                Ok(()) => debug!(ts = message.timestamp, "heartbeat sent"),
                Err(e) => warn!("heartbeat failed: {e}"),
            }
        }

        info!("heartbeat stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::sink::mock::Delivery;
    use crate::infrastructure::sink::MockSink;
    use std::time::Instant;

    #[test]
    fn test_new_emitter_is_idle() {
        let sink = Box::new(MockSink::new());
        let emitter = HeartbeatEmitter::new("r1", Duration::from_secs(1), sink);
        assert_eq!(emitter.state(), HeartbeatState::Idle);
    }

    #[test]
    fn test_emits_about_one_heartbeat_per_interval() {
        // Arrange
        let sink = MockSink::new();
        let mut emitter =
            HeartbeatEmitter::new("r1", Duration::from_millis(50), Box::new(sink.clone()));

        // Act
        emitter.start().unwrap();
        thread::sleep(Duration::from_millis(275));
        emitter.stop();

        // Assert – floor(275 / 50) = 5, allow one either side
        let count = sink.heartbeat_attempts();
        assert!((4..=6).contains(&count), "got {count} heartbeats");
        assert_eq!(emitter.state(), HeartbeatState::Stopped);
    }

    #[test]
    fn test_failed_heartbeat_is_not_retried() {
        // Arrange
        let sink = MockSink::new();
        sink.fail_all_heartbeats();
        let mut emitter =
            HeartbeatEmitter::new("r1", Duration::from_millis(100), Box::new(sink.clone()));

        // Act
        emitter.start().unwrap();
        thread::sleep(Duration::from_millis(150));
        emitter.stop();

        // Assert
        assert_eq!(sink.heartbeat_attempts(), 1);
    }

    #[test]
    fn test_heartbeat_carries_relay_id() {
        let sink = MockSink::new();
        let mut emitter =
            HeartbeatEmitter::new("relay-7", Duration::from_millis(20), Box::new(sink.clone()));

        emitter.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        emitter.stop();

        let attempts = sink.attempts();
        assert!(!attempts.is_empty());
        assert!(attempts.iter().all(|a| matches!(
            &a.delivery,
            Delivery::Heartbeat { relay_id, .. } if relay_id == "relay-7"
        )));
    }

    #[test]
    fn test_start_is_only_valid_from_idle() {
        // Arrange
        let mut emitter =
            HeartbeatEmitter::new("r1", Duration::from_secs(10), Box::new(MockSink::new()));

        // Act / Assert
        emitter.start().unwrap();
        assert!(matches!(emitter.start(), Err(HeartbeatError::AlreadyStarted)));
        emitter.stop();
        assert!(matches!(emitter.start(), Err(HeartbeatError::AlreadyStopped)));
    }

    #[test]
    fn test_stop_is_prompt_and_idempotent() {
        // Arrange – an interval far longer than the test
        let mut emitter =
            HeartbeatEmitter::new("r1", Duration::from_secs(60), Box::new(MockSink::new()));
        emitter.start().unwrap();

        // Act
        let started = Instant::now();
        emitter.stop();
        emitter.stop();

        // Assert
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(emitter.state(), HeartbeatState::Stopped);
    }

    #[test]
    fn test_stop_before_start_marks_stopped() {
        let mut emitter =
            HeartbeatEmitter::new("r1", Duration::from_secs(1), Box::new(MockSink::new()));
        emitter.stop();
        assert_eq!(emitter.state(), HeartbeatState::Stopped);
    }
}
