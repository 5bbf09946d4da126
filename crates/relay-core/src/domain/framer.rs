//! ScanFramer: turns one device's key-event stream into scan records.
//!
//! # How framing works
//!
//! A keyboard-wedge scanner has no notion of "message boundaries": it simply
//! types characters.  The framer rebuilds those boundaries:
//!
//! ```text
//! key-down 2  ─► '1' ─► buffer "1"        termination? no
//! key-up   2  ─► ignored
//! key-down 42 ─► (shift, no char)         buffer unchanged
//! key-down 3  ─► '2' ─► buffer "12"       termination? no
//! key-down 28 ─► '\n' ─► buffer "12\n"    termination? yes ─► ScanEvent("12\n")
//!                                          buffer cleared
//! ```
//!
//! The termination regex is tested against the *whole* buffer from its start
//! after every appended character (see [`TerminationPattern`]).
//!
//! The buffer only ever clears on emission or through [`ScanFramer::reset`],
//! which the coordinator calls when the device (re)connects.

use std::sync::Arc;

use super::device::{DeviceSpec, TerminationPattern};
use super::scan::{unix_timestamp, RawKeyEvent, ScanEvent};
use crate::keymap::KeyDecoder;

/// Per-device framing state.
pub struct ScanFramer {
    device_id: String,
    termination: TerminationPattern,
    decoder: Arc<dyn KeyDecoder>,
    buffer: String,
}

impl ScanFramer {
    pub fn new(
        device_id: impl Into<String>,
        termination: TerminationPattern,
        decoder: Arc<dyn KeyDecoder>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            termination,
            decoder,
            buffer: String::new(),
        }
    }

    /// Creates a framer for a configured device.
    pub fn for_device(spec: &DeviceSpec, decoder: Arc<dyn KeyDecoder>) -> Self {
        Self::new(spec.id.clone(), spec.termination.clone(), decoder)
    }

    /// Feeds one raw event, stamping any completed scan with the current time.
    pub fn feed(&mut self, event: RawKeyEvent) -> Option<ScanEvent> {
        self.feed_at(event, unix_timestamp())
    }

    /// Feeds one raw event, stamping any completed scan with `timestamp`.
    pub fn feed_at(&mut self, event: RawKeyEvent, timestamp: i64) -> Option<ScanEvent> {
        if !event.is_key_down {
            return None;
        }
        let ch = self.decoder.decode(event.code)?;
        self.buffer.push(ch);

        if !self.termination.is_complete(&self.buffer) {
            return None;
        }

        let text = std::mem::take(&mut self.buffer);
        Some(ScanEvent::new(self.device_id.clone(), text, timestamp))
    }

    /// Discards any partial input.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// The partial input accumulated since the last emission or reset.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl std::fmt::Debug for ScanFramer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanFramer")
            .field("device_id", &self.device_id)
            .field("termination", &self.termination)
            .field("buffer", &self.buffer)
            .finish()
    }
}
