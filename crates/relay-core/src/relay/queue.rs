//! Bounded relay queue between the capture path and the delivery sender.
//!
//! # Guarantees
//!
//! - **FIFO per producer.**  Events pushed by one producer are popped in the
//!   order they were pushed.
//! - **Sequence = queue order.**  The next sequence number lives inside the
//!   enqueue lock.  An event is stamped and sent under that one guard, and the
//!   number only advances once the send succeeds, so the stamps observed by
//!   the consumer are strictly increasing with no gaps.
//! - **Backpressure, not loss.**  A full queue blocks the producer.  The
//!   blocked producer re-checks the stop signal every
//!   [`FULL_QUEUE_RECHECK`] and only gives up once stop has been requested.
//!
//! A sustained sink outage therefore eventually stalls capture once the queue
//! saturates.  That is the intended failure mode.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, SendTimeoutError};
use thiserror::Error;

use super::stop::StopSignal;
use crate::domain::ScanEvent;

/// How often a producer blocked on a full queue looks at the stop signal.
pub const FULL_QUEUE_RECHECK: Duration = Duration::from_millis(100);

/// Error type for relay queue operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Stop was requested while the producer was waiting for free capacity.
    #[error("relay stopped while the queue was full")]
    Stopped,
    /// The other side of the queue has been dropped.
    #[error("relay queue disconnected")]
    Disconnected,
}

#[derive(Debug)]
struct Shared {
    /// Next sequence number to assign.
    next_sequence: Mutex<u64>,
    capacity: usize,
}

/// Producing half; clone one per capture path.
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: crossbeam_channel::Sender<ScanEvent>,
    shared: Arc<Shared>,
}

/// Consuming half; there is exactly one.
#[derive(Debug)]
pub struct QueueConsumer {
    rx: crossbeam_channel::Receiver<ScanEvent>,
    shared: Arc<Shared>,
}

/// A freshly created queue, before its halves are handed to workers.
#[derive(Debug)]
pub struct RelayQueue {
    producer: QueueProducer,
    consumer: QueueConsumer,
}

impl RelayQueue {
    /// Creates a queue holding at most `capacity` events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = relay_queue(capacity);
        Self { producer, consumer }
    }

    /// Returns an additional producer.
    pub fn producer(&self) -> QueueProducer {
        self.producer.clone()
    }

    pub fn capacity(&self) -> usize {
        self.consumer.capacity()
    }

    pub fn split(self) -> (QueueProducer, QueueConsumer) {
        (self.producer, self.consumer)
    }
}

/// Creates a relay queue holding at most `capacity` events (minimum 1).
pub fn relay_queue(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let capacity = capacity.max(1);
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let shared = Arc::new(Shared {
        next_sequence: Mutex::new(0),
        capacity,
    });
    (
        QueueProducer {
            tx,
            shared: Arc::clone(&shared),
        },
        QueueConsumer { rx, shared },
    )
}

impl QueueProducer {
    /// Stamps `event` with the next sequence number and enqueues it, blocking
    /// while the queue is full.
    ///
    /// Returns the assigned sequence number.
    ///
    /// # Errors
    ///
    /// [`QueueError::Stopped`] if stop is requested while waiting for space;
    /// [`QueueError::Disconnected`] if the consumer is gone.  In both cases the
    /// event was not enqueued and no sequence number was consumed.
    pub fn push(&self, mut event: ScanEvent, stop: &StopSignal) -> Result<u64, QueueError> {
        let mut next_sequence = self
            .shared
            .next_sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let sequence = *next_sequence;
        event.sequence = sequence;

        loop {
            match self.tx.send_timeout(event, FULL_QUEUE_RECHECK) {
                Ok(()) => {
                    *next_sequence += 1;
                    return Ok(sequence);
                }
                Err(SendTimeoutError::Timeout(returned)) => {
                    if stop.is_stopped() {
                        return Err(QueueError::Stopped);
                    }
                    tracing::debug!(sequence, "relay queue full, waiting for the sender");
                    event = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(QueueError::Disconnected),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

impl QueueConsumer {
    /// Waits up to `timeout` for the next event.
    ///
    /// Returns `Ok(None)` on timeout.
    ///
    /// # Errors
    ///
    /// [`QueueError::Disconnected`] once every producer is dropped and the
    /// queue has been drained.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<ScanEvent>, QueueError> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(QueueError::Disconnected),
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::stop::stop_channel;
    use std::thread;
    use std::time::Instant;

    const SHORT: Duration = Duration::from_millis(20);

    fn scan(device: &str, text: &str) -> ScanEvent {
        ScanEvent::new(device, text, 0)
    }

    #[test]
    fn test_push_then_pop_preserves_fifo_order() {
        // Arrange
        let (_handle, stop) = stop_channel();
        let (producer, consumer) = relay_queue(8);

        // Act
        producer.push(scan("d1", "first"), &stop).unwrap();
        producer.push(scan("d1", "second"), &stop).unwrap();

        // Assert
        assert_eq!(consumer.pop_timeout(SHORT).unwrap().unwrap().text, "first");
        assert_eq!(consumer.pop_timeout(SHORT).unwrap().unwrap().text, "second");
    }

    #[test]
    fn test_push_stamps_increasing_sequence_numbers() {
        let (_handle, stop) = stop_channel();
        let (producer, consumer) = relay_queue(8);

        let a = producer.push(scan("d1", "a"), &stop).unwrap();
        let b = producer.push(scan("d2", "b"), &stop).unwrap();

        assert_eq!((a, b), (0, 1));
        assert_eq!(consumer.pop_timeout(SHORT).unwrap().unwrap().sequence, 0);
        assert_eq!(consumer.pop_timeout(SHORT).unwrap().unwrap().sequence, 1);
    }

    #[test]
    fn test_pop_timeout_returns_none_when_empty() {
        let (_producer, consumer) = relay_queue(1);
        assert_eq!(consumer.pop_timeout(SHORT), Ok(None));
    }

    #[test]
    fn test_pop_reports_disconnected_after_producers_dropped_and_drained() {
        // Arrange
        let (_handle, stop) = stop_channel();
        let (producer, consumer) = relay_queue(4);
        producer.push(scan("d1", "last"), &stop).unwrap();

        // Act
        drop(producer);

        // Assert – queued events are still delivered before the disconnect
        assert_eq!(consumer.pop_timeout(SHORT).unwrap().unwrap().text, "last");
        assert_eq!(consumer.pop_timeout(SHORT), Err(QueueError::Disconnected));
    }

    #[test]
    fn test_full_queue_blocks_producer_until_space_frees() {
        // Arrange
        let (_handle, stop) = stop_channel();
        let (producer, consumer) = relay_queue(1);
        producer.push(scan("d1", "fills"), &stop).unwrap();

        // Act – second push must wait for the consumer
        let blocked = {
            let producer = producer.clone();
            let stop = stop.clone();
            thread::spawn(move || producer.push(scan("d1", "waits"), &stop))
        };
        thread::sleep(Duration::from_millis(150));
        assert!(!blocked.is_finished(), "producer must block on a full queue");
        let first = consumer.pop_timeout(SHORT).unwrap().unwrap();

        // Assert
        assert_eq!(blocked.join().unwrap(), Ok(1));
        assert_eq!(first.text, "fills");
        assert_eq!(consumer.pop_timeout(SHORT).unwrap().unwrap().text, "waits");
    }

    #[test]
    fn test_full_queue_push_gives_up_on_stop() {
        // Arrange
        let (handle, stop) = stop_channel();
        let (producer, consumer) = relay_queue(1);
        producer.push(scan("d1", "fills"), &stop).unwrap();

        // Act
        let started = Instant::now();
        let blocked = thread::spawn(move || producer.push(scan("d1", "dropped"), &stop));
        thread::sleep(SHORT);
        handle.stop();
        let result = blocked.join().unwrap();

        // Assert
        assert_eq!(result, Err(QueueError::Stopped));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(consumer.len(), 1);
    }

    #[test]
    fn test_failed_push_does_not_consume_a_sequence_number() {
        let (_handle, stop) = stop_channel();
        let (producer, consumer) = relay_queue(2);
        producer.push(scan("d1", "a"), &stop).unwrap();
        drop(consumer);

        assert_eq!(producer.push(scan("d1", "b"), &stop), Err(QueueError::Disconnected));
        assert_eq!(*producer.shared.next_sequence.lock().unwrap(), 1);
    }

    #[test]
    fn test_push_after_stopped_wait_reuses_the_sequence_number() {
        // Arrange – a full queue whose blocked push is abandoned on stop
        let (handle, stop) = stop_channel();
        let (producer, consumer) = relay_queue(1);
        producer.push(scan("d1", "fills"), &stop).unwrap();
        handle.stop();
        assert_eq!(producer.push(scan("d1", "dropped"), &stop), Err(QueueError::Stopped));

        // Act
        let first = consumer.pop_timeout(SHORT).unwrap().unwrap();
        let next = producer.push(scan("d1", "after"), &stop);

        // Assert
        assert_eq!(first.sequence, 0);
        assert_eq!(next, Ok(1));
        assert_eq!(consumer.pop_timeout(SHORT).unwrap().unwrap().sequence, 1);
    }

    #[test]
    fn test_relay_queue_producers_share_one_sequence() {
        // Arrange
        let (_handle, stop) = stop_channel();
        let queue = RelayQueue::new(4);
        let extra = queue.producer();
        let (producer, consumer) = queue.split();

        // Act
        extra.push(scan("d1", "a"), &stop).unwrap();
        producer.push(scan("d2", "b"), &stop).unwrap();

        // Assert
        assert_eq!(consumer.pop_timeout(SHORT).unwrap().unwrap().sequence, 0);
        assert_eq!(consumer.pop_timeout(SHORT).unwrap().unwrap().sequence, 1);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let (producer, consumer) = relay_queue(0);
        assert_eq!(producer.capacity(), 1);
        assert_eq!(consumer.capacity(), 1);
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        // Arrange
        let (_handle, stop) = stop_channel();
        let (producer, consumer) = relay_queue(16);
        let per_producer = 50;

        // Act
        let workers: Vec<_> = ["d1", "d2", "d3"]
            .into_iter()
            .map(|device| {
                let producer = producer.clone();
                let stop = stop.clone();
                thread::spawn(move || {
                    for i in 0..per_producer {
                        producer.push(scan(device, &i.to_string()), &stop).unwrap();
                    }
                })
            })
            .collect();
        drop(producer);

        let mut received = Vec::new();
        while let Ok(next) = consumer.pop_timeout(Duration::from_secs(1)) {
            match next {
                Some(event) => received.push(event),
                None => break,
            }
        }
        for worker in workers {
            worker.join().unwrap();
        }

        // Assert – sequence numbers follow dequeue order
        assert_eq!(received.len(), 3 * per_producer);
        for (expected, event) in received.iter().enumerate() {
            assert_eq!(event.sequence, expected as u64);
        }
        // ...and each producer's own events stay in push order
        for device in ["d1", "d2", "d3"] {
            let texts: Vec<usize> = received
                .iter()
                .filter(|e| e.device_id == device)
                .map(|e| e.text.parse().unwrap())
                .collect();
            assert_eq!(texts, (0..per_producer).collect::<Vec<_>>());
        }
    }
}
