//! Infrastructure layer for the relay.
//!
//! Contains OS-facing adapters: keyboard device capture, message sinks,
//! configuration file storage, and the global logger.
//!
//! **Dependency rule**: the `application` layer may use the traits declared
//! here (`DeviceCapability`, `Sink`), but never a concrete adapter; those are
//! chosen and injected by `main.rs`.

pub mod device_capture;
pub mod logging;
pub mod sink;
pub mod storage;
