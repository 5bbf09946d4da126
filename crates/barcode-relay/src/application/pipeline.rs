//! RelayPipeline: wires capture, queue and delivery together.
//!
//! ```text
//!  relay-capture ──push──► RelayQueue ──pop──► relay-sender ──► Sink
//! ```
//!
//! The pipeline owns the stop handle shared by both workers.  [`stop`] is the
//! only shutdown path: it triggers the signal, then joins the workers, so the
//! capture thread has released every device and the sender has dropped its
//! sink connection by the time it returns.
//!
//! [`stop`]: RelayPipeline::stop

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use relay_core::{
    relay_queue, stop_channel, DeviceSpec, KeyDecoder, QueueProducer, StopHandle, StopSignal,
};
use thiserror::Error;
use tracing::{error, info};

use super::coordinator::MultiDeviceCoordinator;
use super::deliver_scans::{DeliverySender, DeliveryStats, DEFAULT_DEQUEUE_TIMEOUT};
use super::panic_message;
use crate::infrastructure::device_capture::DeviceCapability;
use crate::infrastructure::sink::Sink;
use crate::infrastructure::storage::config::AppConfig;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to spawn the {worker} thread: {source}")]
    Spawn {
        worker: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Timing and sizing knobs for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub poll_interval: Duration,
    pub queue_capacity: usize,
    pub retry_backoff: Duration,
    pub dequeue_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            queue_capacity: config.capture.queue_capacity,
            retry_backoff: config.retry_backoff(),
            dequeue_timeout: DEFAULT_DEQUEUE_TIMEOUT,
        }
    }
}

/// Running capture and delivery workers.
pub struct RelayPipeline {
    stop: StopHandle,
    producer: QueueProducer,
    stats: DeliveryStats,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl RelayPipeline {
    /// Starts the capture loop and the delivery sender.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Spawn`] if a worker thread cannot be created; any
    /// worker already started is stopped and joined first.
    pub fn start<C>(
        capability: C,
        specs: Vec<DeviceSpec>,
        decoder: Arc<dyn KeyDecoder>,
        sink: Box<dyn Sink>,
        settings: PipelineSettings,
    ) -> Result<Self, PipelineError>
    where
        C: DeviceCapability + 'static,
    {
        let mut pipeline = Self::start_sender_only(sink, settings)?;

        let coordinator = MultiDeviceCoordinator::new(
            capability,
            specs,
            decoder,
            pipeline.producer.clone(),
            pipeline.stop.signal(),
            settings.poll_interval,
        );
        let capture = coordinator.spawn().map_err(|source| PipelineError::Spawn {
            worker: "relay-capture",
            source,
        })?;
        pipeline.workers.push(("relay-capture", capture));

        info!("relay pipeline started");
        Ok(pipeline)
    }

    /// Starts only the delivery sender; scans are pushed through
    /// [`producer`](Self::producer).
    pub fn start_sender_only(
        sink: Box<dyn Sink>,
        settings: PipelineSettings,
    ) -> Result<Self, PipelineError> {
        let (producer, consumer) = relay_queue(settings.queue_capacity);
        let (stop, signal) = stop_channel();

        let sender = DeliverySender::new(sink, consumer, signal, settings.retry_backoff)
            .with_dequeue_timeout(settings.dequeue_timeout);
        let stats = sender.stats();
        let worker = sender.spawn().map_err(|source| PipelineError::Spawn {
            worker: "relay-sender",
            source,
        })?;

        Ok(Self {
            stop,
            producer,
            stats,
            workers: vec![("relay-sender", worker)],
        })
    }

    /// A producer onto the pipeline's relay queue.
    pub fn producer(&self) -> QueueProducer {
        self.producer.clone()
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.signal()
    }

    pub fn stats(&self) -> DeliveryStats {
        self.stats.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Signals every worker and joins them.  Idempotent.
    pub fn stop(&mut self) {
        self.stop.stop();
        if self.workers.is_empty() {
            return;
        }
        for (name, worker) in self.workers.drain(..) {
            if let Err(payload) = worker.join() {
                error!("{name} worker panicked: {}", panic_message(payload.as_ref()));
            }
        }
        info!(
            delivered = self.stats.delivered(),
            failed_attempts = self.stats.failed_attempts(),
            "relay pipeline stopped"
        );
    }
}

impl Drop for RelayPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
