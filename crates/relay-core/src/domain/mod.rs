//! Domain layer: pure data types and framing logic.
//!
//! Nothing here touches devices, sockets or files.  The application crate
//! feeds raw key events in and takes scan records out.
//!
//! # Sub-modules
//!
//! - **`scan`**   – raw key events, scan records, heartbeat records.
//! - **`device`** – configured devices and their hardware-id/termination patterns.
//! - **`framer`** – per-device buffer that detects complete scans.

pub mod device;
pub mod framer;
pub mod scan;

pub use device::{DeviceSpec, HwidPattern, PatternError, TerminationPattern};
pub use framer::ScanFramer;
pub use scan::{unix_timestamp, HeartbeatMessage, RawKeyEvent, ScanEvent};
