//! # relay-core
//!
//! Core library for Barcode Relay: the parts of the capture/relay pipeline
//! that have no dependency on OS devices, network sinks or files.
//!
//! # Architecture overview
//!
//! A USB barcode scanner in keyboard mode "types" each barcode as a burst of
//! key presses.  Barcode Relay grabs those key presses from the scanner's
//! input device, reassembles them into scans and forwards each scan to a
//! message sink.
//!
//! This crate provides:
//!
//! - **`keymap`** – pluggable decoding of raw key codes into characters.
//!
//! - **`domain`** – scan and heartbeat records, configured device patterns,
//!   and the [`ScanFramer`] that detects complete scans in a key stream.
//!
//! - **`relay`** – the bounded queue that hands scans from the capture thread
//!   to the delivery thread (stamping each with its queue-order sequence
//!   number) and the stop signal every worker observes.

pub mod domain;
pub mod keymap;
pub mod relay;

pub use domain::{
    unix_timestamp, DeviceSpec, HeartbeatMessage, HwidPattern, PatternError, RawKeyEvent,
    ScanEvent, ScanFramer, TerminationPattern,
};
pub use keymap::{KeyDecoder, LinuxKeyDecoder};
pub use relay::{
    relay_queue, stop_channel, QueueConsumer, QueueError, QueueProducer, RelayQueue, StopHandle,
    StopSignal,
};
