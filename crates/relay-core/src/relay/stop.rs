//! Cooperative stop signal shared by every relay worker.
//!
//! A [`StopHandle`] owns the sending half of a zero-capacity channel that never
//! carries a message.  Triggering the handle drops that sender; every
//! [`StopSignal`] observer then sees the channel disconnect.  Waiting on the
//! signal with a timeout doubles as an interruptible sleep, so a worker parked
//! in a retry backoff wakes the moment stop is requested.
//!
//! Dropping the handle has the same effect as calling [`StopHandle::stop`].

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Trigger side of the stop signal.
#[derive(Debug)]
pub struct StopHandle {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

/// Observer side of the stop signal; cheap to clone into each worker.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: Receiver<()>,
}

/// Creates a connected handle/signal pair.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = bounded(0);
    let handle = StopHandle {
        tx: Mutex::new(Some(tx)),
        rx: rx.clone(),
    };
    (handle, StopSignal { rx })
}

impl StopHandle {
    /// Requests every observer to stop.  Idempotent.
    pub fn stop(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Returns another observer for this handle.
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.rx.clone(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}

impl StopSignal {
    /// Non-blocking check.
    pub fn is_stopped(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleeps for up to `timeout`, returning early with `true` if stop is
    /// requested.  Returns `false` when the full timeout elapsed.
    pub fn wait(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
            // Nothing is ever sent on the channel.
            Ok(()) => self.is_stopped(),
        }
    }
}
