//! Producer/consumer handoff between capture and delivery.
//!
//! - **`queue`**    – bounded FIFO with sequence stamping and backpressure.
//! - **`stop`**     – the single cooperative stop signal observed by all workers.

pub mod queue;
pub mod stop;

pub use queue::{relay_queue, QueueConsumer, QueueError, QueueProducer, RelayQueue};
pub use stop::{stop_channel, StopHandle, StopSignal};
