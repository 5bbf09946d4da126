//! Linux evdev capture backend.
//!
//! # How it works
//!
//! 1. **Enumerate** – every `/dev/input/event*` node is opened once per tick
//!    (nodes already held open are reused).  Nodes that advertise neither
//!    `KEY_ENTER` nor `KEY_A` are not keyboards and are skipped.
//! 2. **Identify** – a hardware id is synthesized from the evdev input id and
//!    the physical path: `USB\VID_1234&PID_5678\usb-0000:00:14.0-2/input0`.
//! 3. **Grab** – a matching device is grabbed (`EVIOCGRAB`) so the scanner's
//!    keystrokes stop reaching the focused window, and its file descriptor is
//!    switched to non-blocking mode.
//! 4. **Read** – `poll(2)` waits for readiness up to the per-device timeout,
//!    then every pending event is fetched.  `ENODEV` means the device was
//!    unplugged.
//!
//! Opening input nodes normally requires membership in the `input` group
//! or root.  A node that exists but cannot be opened is remembered.  When no
//! readable node matches a device, those nodes may hide it, so the device is
//! reported as "permission denied" instead of "not attached".  Which of the
//! unreadable nodes it is cannot be known, so all of them are named.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use evdev::{Device, EventType, Key};
use relay_core::{HwidPattern, RawKeyEvent};
use tracing::{debug, info};

use super::{CaptureError, DeviceCapability, DeviceHandle};

const INPUT_DIR: &str = "/dev/input";

/// An attached keyboard seen during the last enumeration.
#[derive(Debug, Clone)]
struct AttachedDevice {
    node: String,
    hwid: String,
}

/// [`DeviceCapability`] backed by the kernel evdev interface.
#[derive(Default)]
pub struct EvdevCapability {
    attached: Vec<AttachedDevice>,
    denied: Vec<String>,
    open: HashMap<String, (DeviceHandle, Device)>,
}

impl EvdevCapability {
    pub fn new() -> Self {
        Self::default()
    }

    fn enumerate(&mut self) -> Result<(), CaptureError> {
        self.enumerate_in(Path::new(INPUT_DIR))
    }

    fn enumerate_in(&mut self, dir: &Path) -> Result<(), CaptureError> {
        // Forget the previous tick first so a failed scan never leaves stale
        // devices to resolve against.
        self.attached.clear();
        self.denied.clear();

        let entries = std::fs::read_dir(dir).map_err(|source| CaptureError::Io {
            node: dir.display().to_string(),
            source,
        })?;

        let mut nodes: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_event_node(path))
            .collect();
        nodes.sort();

        for path in nodes {
            let node = path.display().to_string();
            if let Some((handle, _)) = self.open.get(&node) {
                self.attached.push(AttachedDevice {
                    node,
                    hwid: handle.hwid.clone(),
                });
                continue;
            }
            match Device::open(&path) {
                Ok(device) if is_keyboard(&device) => self.attached.push(AttachedDevice {
                    hwid: hardware_id(&device),
                    node,
                }),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => self.denied.push(node),
                // Nodes can vanish between read_dir and open.
                Err(e) => debug!("skipping {node}: {e}"),
            }
        }
        Ok(())
    }

    fn open_and_grab(&mut self, attached: &AttachedDevice) -> Result<DeviceHandle, CaptureError> {
        let io_err = |source: io::Error| {
            if source.kind() == io::ErrorKind::PermissionDenied {
                CaptureError::PermissionDenied {
                    node: attached.node.clone(),
                }
            } else {
                CaptureError::Io {
                    node: attached.node.clone(),
                    source,
                }
            }
        };

        let mut device = Device::open(&attached.node).map_err(io_err)?;
        device.grab().map_err(io_err)?;
        set_nonblocking(&device).map_err(io_err)?;

        let handle = DeviceHandle::new(&attached.node, &attached.hwid);
        info!("grabbed {handle}");
        self.open.insert(attached.node.clone(), (handle.clone(), device));
        Ok(handle)
    }
}

impl DeviceCapability for EvdevCapability {
    fn refresh(&mut self) -> Result<(), CaptureError> {
        self.enumerate()
    }

    fn resolve(&mut self, pattern: &HwidPattern) -> Result<Option<DeviceHandle>, CaptureError> {
        let Some(attached) = self.attached.iter().find(|d| pattern.matches(&d.hwid)).cloned() else {
            return unmatched(&self.denied);
        };

        if let Some((handle, _)) = self.open.get(&attached.node) {
            if handle.hwid == attached.hwid {
                return Ok(Some(handle.clone()));
            }
        }
        self.open_and_grab(&attached).map(Some)
    }

    fn poll_events(
        &mut self,
        handle: &DeviceHandle,
        timeout: Duration,
    ) -> Result<Vec<RawKeyEvent>, CaptureError> {
        let Some((_, device)) = self.open.get_mut(&handle.node) else {
            return Err(CaptureError::NotFound {
                node: handle.node.clone(),
            });
        };

        let ready = wait_readable(device, timeout).map_err(|e| read_error(handle, e))?;
        if !ready {
            return Ok(Vec::new());
        }

        match device.fetch_events() {
            Ok(events) => Ok(events
                .filter(|event| event.event_type() == EventType::KEY)
                .filter_map(|event| key_event(event.code(), event.value()))
                .collect()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(read_error(handle, e)),
        }
    }

    fn release(&mut self, handle: &DeviceHandle) {
        if let Some((_, mut device)) = self.open.remove(&handle.node) {
            // The grab dies with the file descriptor; ungrab is best effort.
            let _ = device.ungrab();
            info!("released {handle}");
        }
    }

    fn list_devices(&mut self) -> Result<Vec<String>, CaptureError> {
        self.enumerate()?;
        Ok(self.attached.iter().map(|d| d.hwid.clone()).collect())
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn is_event_node(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("event"))
}

/// Outcome of `resolve` when no readable keyboard matches the pattern.
fn unmatched(denied: &[String]) -> Result<Option<DeviceHandle>, CaptureError> {
    match denied {
        [] => Ok(None),
        [node] => Err(CaptureError::PermissionDenied { node: node.clone() }),
        nodes => Err(CaptureError::PermissionDenied {
            node: format!("one of {} unreadable nodes ({})", nodes.len(), nodes.join(", ")),
        }),
    }
}

/// Converts an `EV_KEY` event; values other than release (0), press (1) and
/// auto-repeat (2) are malformed and dropped.
fn key_event(code: u16, value: i32) -> Option<RawKeyEvent> {
    match value {
        0 | 2 => Some(RawKeyEvent::key_up(code)),
        1 => Some(RawKeyEvent::key_down(code)),
        other => {
            debug!(code, value = other, "dropping malformed key event");
            None
        }
    }
}

fn is_keyboard(device: &Device) -> bool {
    device
        .supported_keys()
        .map(|keys| keys.contains(Key::KEY_ENTER) || keys.contains(Key::KEY_A))
        .unwrap_or(false)
}

/// Builds `<BUS>\VID_<vvvv>&PID_<pppp>\<phys>` for a device.
fn hardware_id(device: &Device) -> String {
    let id = device.input_id();
    format_hardware_id(
        id.bus_type().0,
        id.vendor(),
        id.product(),
        device.physical_path().unwrap_or(""),
    )
}

fn format_hardware_id(bus: u16, vendor: u16, product: u16, phys: &str) -> String {
    format!(
        "{}\\VID_{vendor:04X}&PID_{product:04X}\\{phys}",
        bus_name(bus)
    )
}

/// Names for the `BUS_*` constants of `linux/input.h`.
fn bus_name(bus: u16) -> String {
    match bus {
        0x01 => "PCI".to_string(),
        0x03 => "USB".to_string(),
        0x05 => "BLUETOOTH".to_string(),
        0x06 => "VIRTUAL".to_string(),
        0x11 => "I8042".to_string(),
        0x18 => "I2C".to_string(),
        0x19 => "HOST".to_string(),
        other => format!("BUS_{other:02X}"),
    }
}

fn read_error(handle: &DeviceHandle, source: io::Error) -> CaptureError {
    if source.raw_os_error() == Some(libc::ENODEV) {
        CaptureError::Disconnected {
            node: handle.node.clone(),
        }
    } else {
        CaptureError::Io {
            node: handle.node.clone(),
            source,
        }
    }
}

fn set_nonblocking(device: &Device) -> io::Result<()> {
    let raw_fd = device.as_raw_fd();

    // Preserve existing flags; just OR in O_NONBLOCK.
    let current = unsafe { libc::fcntl(raw_fd, libc::F_GETFL) };
    if current < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(raw_fd, libc::F_SETFL, current | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Waits until `device` has data to read or `timeout` elapses.
///
/// A hang-up or error condition on the descriptor counts as readable so the
/// following read reports it.
fn wait_readable(device: &Device, timeout: Duration) -> io::Result<bool> {
    let mut fds = libc::pollfd {
        fd: device.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

    let rc = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
    match rc {
        0 => Ok(false),
        n if n > 0 => {
            if fds.revents & libc::POLLNVAL != 0 {
                return Err(io::Error::from_raw_os_error(libc::ENODEV));
            }
            Ok(true)
        }
        _ => {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                Ok(false)
            } else {
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_id_format_for_usb_device() {
        let hwid = format_hardware_id(0x03, 0x1234, 0x5678, "usb-0000:00:14.0-2/input0");
        assert_eq!(hwid, r"USB\VID_1234&PID_5678\usb-0000:00:14.0-2/input0");
    }

    #[test]
    fn test_hardware_id_uses_upper_case_hex() {
        let hwid = format_hardware_id(0x03, 0x0c2e, 0x0b61, "");
        assert_eq!(hwid, r"USB\VID_0C2E&PID_0B61\");
    }

    #[test]
    fn test_unknown_bus_is_rendered_numerically() {
        assert_eq!(bus_name(0x42), "BUS_42");
        assert_eq!(bus_name(0x05), "BLUETOOTH");
    }

    #[test]
    fn test_vid_pid_pattern_matches_synthesized_hwid() {
        // Arrange
        let hwid = format_hardware_id(0x03, 0x0c2e, 0x0b61, "usb-0000:00:14.0-1/input0");

        // Act / Assert
        assert!(HwidPattern::from_vid_pid(0x0c2e, Some(0x0b61)).matches(&hwid));
        assert!(HwidPattern::from_vid_pid(0x0c2e, None).matches(&hwid));
        assert!(!HwidPattern::from_vid_pid(0x0c2f, None).matches(&hwid));
    }

    #[test]
    fn test_only_event_nodes_are_considered() {
        assert!(is_event_node(Path::new("/dev/input/event12")));
        assert!(!is_event_node(Path::new("/dev/input/mouse0")));
        assert!(!is_event_node(Path::new("/dev/input/by-id")));
    }

    #[test]
    fn test_resolve_without_enumeration_finds_nothing() {
        let mut capability = EvdevCapability::new();
        let pattern = HwidPattern::new(".*").unwrap();
        assert_eq!(capability.resolve(&pattern).unwrap(), None);
    }

    #[test]
    fn test_unmatched_without_denied_nodes_is_not_attached() {
        assert_eq!(unmatched(&[]).unwrap(), None);
    }

    #[test]
    fn test_unmatched_with_one_denied_node_names_it() {
        let denied = vec!["/dev/input/event4".to_string()];
        assert!(matches!(
            unmatched(&denied),
            Err(CaptureError::PermissionDenied { ref node }) if node == "/dev/input/event4"
        ));
    }

    #[test]
    fn test_unmatched_with_several_denied_nodes_names_all_of_them() {
        // Arrange
        let denied = vec!["/dev/input/event4".to_string(), "/dev/input/event7".to_string()];

        // Act
        let err = unmatched(&denied).unwrap_err();

        // Assert
        assert_eq!(
            err.to_string(),
            "permission denied opening one of 2 unreadable nodes \
             (/dev/input/event4, /dev/input/event7)"
        );
    }

    #[test]
    fn test_failed_enumeration_forgets_previous_devices() {
        // Arrange – state left over from an earlier successful tick
        let mut capability = EvdevCapability::new();
        capability.attached.push(AttachedDevice {
            node: "/dev/input/event3".to_string(),
            hwid: r"USB\VID_1234&PID_0001\usb-1".to_string(),
        });
        capability.denied.push("/dev/input/event5".to_string());
        let missing = std::env::temp_dir().join("barcode-relay-no-such-input-dir");

        // Act
        let result = capability.enumerate_in(&missing);

        // Assert
        assert!(matches!(result, Err(CaptureError::Io { .. })));
        let pattern = HwidPattern::new(".*").unwrap();
        assert_eq!(capability.resolve(&pattern).unwrap(), None);
    }

    #[test]
    fn test_key_event_values_map_to_press_and_release() {
        assert_eq!(key_event(30, 1), Some(RawKeyEvent::key_down(30)));
        assert_eq!(key_event(30, 0), Some(RawKeyEvent::key_up(30)));
        assert_eq!(key_event(30, 2), Some(RawKeyEvent::key_up(30)));
    }

    #[test]
    fn test_key_event_with_out_of_range_value_is_dropped() {
        assert_eq!(key_event(30, 3), None);
        assert_eq!(key_event(30, -1), None);
    }

    #[test]
    fn test_poll_on_unknown_handle_is_not_found() {
        let mut capability = EvdevCapability::new();
        let handle = DeviceHandle::new("/dev/input/event999", "USB");
        assert!(matches!(
            capability.poll_events(&handle, Duration::ZERO),
            Err(CaptureError::NotFound { .. })
        ));
    }
}
