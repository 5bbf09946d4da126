//! Device capture infrastructure: the narrow contract between the capture
//! loop and the operating system's input devices.
//!
//! On Linux, [`linux::EvdevCapability`] reads `/dev/input/event*` nodes through
//! the kernel evdev interface, grabbing each scanner exclusively so its key
//! presses never reach the focused window.
//!
//! # Hardware ids
//!
//! Every attached keyboard is described by a hardware-id string such as
//!
//! ```text
//! USB\VID_1234&PID_5678\usb-0000:00:14.0-2/input0
//! ```
//!
//! Configured devices bind to a physical device by matching their
//! [`HwidPattern`] against that string.
//!
//! # Testability
//!
//! The [`DeviceCapability`] trait allows unit tests to script attach, detach
//! and key events without real hardware; see [`mock::MockDeviceCapability`].

use std::fmt;
use std::time::Duration;

use relay_core::{HwidPattern, RawKeyEvent};

pub mod mock;

#[cfg(target_os = "linux")]
pub mod linux;

/// Identity of one opened physical device.
///
/// Two handles are the same device only if both the device node and the
/// hardware id agree; a scanner re-plugged into another port is a new handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    /// OS node, e.g. `/dev/input/event7`.
    pub node: String,
    pub hwid: String,
}

impl DeviceHandle {
    pub fn new(node: impl Into<String>, hwid: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            hwid: hwid.into(),
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.node, self.hwid)
    }
}

/// Error type for device capture operations.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The handle no longer refers to an open device.
    #[error("device {node} not found")]
    NotFound { node: String },
    #[error("permission denied opening {node}")]
    PermissionDenied { node: String },
    /// The device went away while it was being read.
    #[error("device {node} disconnected")]
    Disconnected { node: String },
    #[error("I/O error on {node}: {source}")]
    Io {
        node: String,
        #[source]
        source: std::io::Error,
    },
    #[error("platform not supported: {0}")]
    Unsupported(String),
}

/// Trait abstracting keyboard device access.
///
/// The production implementation uses evdev; tests use
/// [`mock::MockDeviceCapability`].  All methods are called from the capture
/// thread only.
pub trait DeviceCapability: Send {
    /// Re-reads the set of attached devices.  Called once at the start of
    /// every capture tick, before any [`resolve`](Self::resolve).
    fn refresh(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    /// Returns the open handle of the first attached device whose hardware id
    /// matches `pattern`, opening it if necessary.  `Ok(None)` means the
    /// device is not attached; it is not an error.
    fn resolve(&mut self, pattern: &HwidPattern) -> Result<Option<DeviceHandle>, CaptureError>;

    /// Waits up to `timeout` for key events from `handle` and returns every
    /// pending one.  An empty vector means nothing arrived in time.
    fn poll_events(
        &mut self,
        handle: &DeviceHandle,
        timeout: Duration,
    ) -> Result<Vec<RawKeyEvent>, CaptureError>;

    /// Closes `handle`, releasing any exclusive grab.  Releasing a handle that
    /// is already gone is a no-op.
    fn release(&mut self, handle: &DeviceHandle);

    /// Installs an event filter covering every pattern, for backends that
    /// need one shared filter across devices.  The default does nothing.
    fn install_filter(&mut self, patterns: &[HwidPattern]) -> Result<(), CaptureError> {
        let _ = patterns;
        Ok(())
    }

    /// Hardware ids of every attached keyboard device.
    fn list_devices(&mut self) -> Result<Vec<String>, CaptureError>;
}

impl<T: DeviceCapability + ?Sized> DeviceCapability for Box<T> {
    fn refresh(&mut self) -> Result<(), CaptureError> {
        (**self).refresh()
    }

    fn resolve(&mut self, pattern: &HwidPattern) -> Result<Option<DeviceHandle>, CaptureError> {
        (**self).resolve(pattern)
    }

    fn poll_events(
        &mut self,
        handle: &DeviceHandle,
        timeout: Duration,
    ) -> Result<Vec<RawKeyEvent>, CaptureError> {
        (**self).poll_events(handle, timeout)
    }

    fn release(&mut self, handle: &DeviceHandle) {
        (**self).release(handle)
    }

    fn install_filter(&mut self, patterns: &[HwidPattern]) -> Result<(), CaptureError> {
        (**self).install_filter(patterns)
    }

    fn list_devices(&mut self) -> Result<Vec<String>, CaptureError> {
        (**self).list_devices()
    }
}

/// Returns the capture backend for the current platform.
///
/// # Errors
///
/// [`CaptureError::Unsupported`] on platforms without a backend.
pub fn platform_capability() -> Result<Box<dyn DeviceCapability>, CaptureError> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux::EvdevCapability::new()))
    }

    #[cfg(not(target_os = "linux"))]
    {
        Err(CaptureError::Unsupported(std::env::consts::OS.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_differ_when_node_differs() {
        let a = DeviceHandle::new("/dev/input/event3", r"USB\VID_1234&PID_0001\p");
        let b = DeviceHandle::new("/dev/input/event4", r"USB\VID_1234&PID_0001\p");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_handle_display_shows_node_and_hwid() {
        let handle = DeviceHandle::new("/dev/input/event3", "HID");
        assert_eq!(handle.to_string(), "/dev/input/event3 (HID)");
    }

    #[test]
    fn test_capture_error_messages_name_the_node() {
        let err = CaptureError::PermissionDenied {
            node: "/dev/input/event9".to_string(),
        };
        assert_eq!(err.to_string(), "permission denied opening /dev/input/event9");
    }
}
