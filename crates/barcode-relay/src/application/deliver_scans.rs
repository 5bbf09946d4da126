//! DeliverySender: drains the relay queue into the sink.
//!
//! # Delivery guarantees
//!
//! The sender holds exactly one event at a time.  A failed delivery is retried
//! after a fixed backoff, for the *same* event, until the sink accepts it or
//! stop is requested.  Nothing behind it is delivered first and nothing is
//! dropped on sink errors, so delivery is strictly in queue order and
//! at-least-once.  An event that is still unacknowledged when stop arrives is
//! lost with the process.
//!
//! Both blocking points (the dequeue and the backoff) wait on the stop signal,
//! so a stop request is observed within one dequeue timeout and wakes a
//! backoff immediately.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use relay_core::{QueueConsumer, QueueError, ScanEvent, StopSignal};
use tracing::{debug, info, info_span, warn, Span};

use super::display_code;
use crate::infrastructure::sink::Sink;

/// How long one dequeue waits before looking at the stop signal again.
pub const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    failed_attempts: AtomicU64,
}

/// Shared, read-only view of the sender's progress.
#[derive(Debug, Clone, Default)]
pub struct DeliveryStats {
    counters: Arc<Counters>,
}

impl DeliveryStats {
    /// Events the sink has accepted.
    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::Acquire)
    }

    /// Delivery attempts the sink has rejected.
    pub fn failed_attempts(&self) -> u64 {
        self.counters.failed_attempts.load(Ordering::Acquire)
    }

    fn record_delivered(&self) {
        self.counters.delivered.fetch_add(1, Ordering::AcqRel);
    }

    fn record_failure(&self) {
        self.counters.failed_attempts.fetch_add(1, Ordering::AcqRel);
    }
}

/// Outcome of handing one event to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Stop arrived before the sink accepted the event.
    Abandoned,
}

/// Single consumer of the relay queue.
pub struct DeliverySender {
    sink: Box<dyn Sink>,
    consumer: QueueConsumer,
    stop: StopSignal,
    backoff: Duration,
    dequeue_timeout: Duration,
    stats: DeliveryStats,
    span: Span,
}

impl DeliverySender {
    pub fn new(
        sink: Box<dyn Sink>,
        consumer: QueueConsumer,
        stop: StopSignal,
        backoff: Duration,
    ) -> Self {
        Self {
            sink,
            consumer,
            stop,
            backoff,
            dequeue_timeout: DEFAULT_DEQUEUE_TIMEOUT,
            stats: DeliveryStats::default(),
            span: info_span!("sender"),
        }
    }

    /// Overrides [`DEFAULT_DEQUEUE_TIMEOUT`].
    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    pub fn stats(&self) -> DeliveryStats {
        self.stats.clone()
    }

    /// Delivers `event`, retrying after every failure until it is accepted or
    /// stop is requested.
    pub fn deliver(&mut self, event: &ScanEvent) -> Delivery {
        let mut attempt: u64 = 1;
        loop {
            match self
                .sink
                .send_scan(&event.device_id, &event.text, event.timestamp)
            {
                Ok(()) => {
                    self.stats.record_delivered();
                    info!(
                        sequence = event.sequence,
                        device = %event.device_id,
                        code = %display_code(&event.text),
                        attempt,
                        "scan delivered"
                    );
                    return Delivery::Delivered;
                }
                Err(e) => {
                    self.stats.record_failure();
                    warn!(
                        sequence = event.sequence,
                        attempt,
                        "delivery failed: {e}; retrying in {:?}",
                        self.backoff
                    );
                }
            }

            if self.stop.wait(self.backoff) {
                warn!(
                    sequence = event.sequence,
                    code = %display_code(&event.text),
                    "stop requested before delivery succeeded; scan abandoned"
                );
                return Delivery::Abandoned;
            }
            attempt += 1;
        }
    }

    /// Loops until stop is requested or every producer is gone.
    pub fn run(mut self) {
        let span = self.span.clone();
        let _enter = span.enter();
        info!(backoff_ms = self.backoff.as_millis() as u64, "sender started");

        while !self.stop.is_stopped() {
            match self.consumer.pop_timeout(self.dequeue_timeout) {
                Ok(Some(event)) => {
                    debug!(sequence = event.sequence, "scan dequeued");
                    if self.deliver(&event) == Delivery::Abandoned {
                        break;
                    }
                }
                Ok(None) => {}
                Err(QueueError::Disconnected) => {
                    info!("relay queue closed and drained");
                    break;
                }
                Err(QueueError::Stopped) => break,
            }
        }

        info!(
            delivered = self.stats.delivered(),
            failed_attempts = self.stats.failed_attempts(),
            "sender stopped"
        );
    }

    /// Runs [`run`](Self::run) on a thread named `relay-sender`.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("relay-sender".to_string())
            .spawn(move || self.run())
    }
}
