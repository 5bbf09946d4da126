//! Mock device capability for unit and integration testing.
//!
//! Allows tests to plug and unplug virtual scanners and to queue key events
//! without real hardware.  The mock is a cheap handle around shared state:
//! clone it, hand one clone to the coordinator and keep the other to drive
//! the scenario.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use relay_core::{HwidPattern, RawKeyEvent};

use super::{CaptureError, DeviceCapability, DeviceHandle};

#[derive(Debug)]
struct MockDevice {
    node: String,
    hwid: String,
    permission_denied: bool,
    pending: VecDeque<RawKeyEvent>,
}

#[derive(Debug, Default)]
struct MockState {
    attached: Vec<MockDevice>,
    released: Vec<DeviceHandle>,
    filter_installs: Vec<Vec<String>>,
    poll_counts: HashMap<String, usize>,
    io_failures: HashMap<String, usize>,
    refreshes: usize,
}

/// A scripted implementation of [`DeviceCapability`].
#[derive(Debug, Clone, Default)]
pub struct MockDeviceCapability {
    state: Arc<Mutex<MockState>>,
}

impl MockDeviceCapability {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("lock poisoned")
    }

    /// Plugs in a device.
    pub fn attach(&self, node: &str, hwid: &str) {
        self.state().attached.push(MockDevice {
            node: node.to_string(),
            hwid: hwid.to_string(),
            permission_denied: false,
            pending: VecDeque::new(),
        });
    }

    /// Plugs in a device that the relay is not allowed to open.
    pub fn attach_denied(&self, node: &str, hwid: &str) {
        self.attach(node, hwid);
        if let Some(device) = self.state().attached.iter_mut().find(|d| d.node == node) {
            device.permission_denied = true;
        }
    }

    /// Unplugs a device, discarding its pending events.
    pub fn detach(&self, node: &str) {
        self.state().attached.retain(|d| d.node != node);
    }

    /// Queues raw events on an attached device.
    ///
    /// Panics if the device is not attached.
    pub fn push_events(&self, node: &str, events: impl IntoIterator<Item = RawKeyEvent>) {
        let mut state = self.state();
        let device = state
            .attached
            .iter_mut()
            .find(|d| d.node == node)
            .unwrap_or_else(|| panic!("MockDeviceCapability::push_events: {node} not attached"));
        device.pending.extend(events);
    }

    /// Queues a key-down/key-up pair for each code, as a scanner types them.
    pub fn type_keys(&self, node: &str, codes: &[u16]) {
        self.push_events(
            node,
            codes
                .iter()
                .flat_map(|&code| [RawKeyEvent::key_down(code), RawKeyEvent::key_up(code)]),
        );
    }

    /// Makes the next `count` polls of `node` fail with an I/O error.
    pub fn fail_polls(&self, node: &str, count: usize) {
        self.state().io_failures.insert(node.to_string(), count);
    }

    /// Handles passed to [`DeviceCapability::release`], in call order.
    pub fn released(&self) -> Vec<DeviceHandle> {
        self.state().released.clone()
    }

    /// Pattern sets passed to [`DeviceCapability::install_filter`].
    pub fn filter_installs(&self) -> Vec<Vec<String>> {
        self.state().filter_installs.clone()
    }

    /// Number of [`DeviceCapability::poll_events`] calls for `node`.
    pub fn poll_count(&self, node: &str) -> usize {
        self.state().poll_counts.get(node).copied().unwrap_or(0)
    }

    pub fn refresh_count(&self) -> usize {
        self.state().refreshes
    }

    pub fn pending(&self, node: &str) -> usize {
        self.state()
            .attached
            .iter()
            .find(|d| d.node == node)
            .map_or(0, |d| d.pending.len())
    }
}

impl DeviceCapability for MockDeviceCapability {
    fn refresh(&mut self) -> Result<(), CaptureError> {
        self.state().refreshes += 1;
        Ok(())
    }

    fn resolve(&mut self, pattern: &HwidPattern) -> Result<Option<DeviceHandle>, CaptureError> {
        let state = self.state();
        match state.attached.iter().find(|d| pattern.matches(&d.hwid)) {
            Some(device) if device.permission_denied => Err(CaptureError::PermissionDenied {
                node: device.node.clone(),
            }),
            Some(device) => Ok(Some(DeviceHandle::new(&device.node, &device.hwid))),
            None => Ok(None),
        }
    }

    fn poll_events(
        &mut self,
        handle: &DeviceHandle,
        _timeout: Duration,
    ) -> Result<Vec<RawKeyEvent>, CaptureError> {
        let mut state = self.state();
        *state.poll_counts.entry(handle.node.clone()).or_default() += 1;

        if let Some(remaining) = state.io_failures.get_mut(&handle.node) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CaptureError::Io {
                    node: handle.node.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "scripted failure"),
                });
            }
        }

        match state
            .attached
            .iter_mut()
            .find(|d| d.node == handle.node && d.hwid == handle.hwid)
        {
            Some(device) => Ok(device.pending.drain(..).collect()),
            None => Err(CaptureError::Disconnected {
                node: handle.node.clone(),
            }),
        }
    }

    fn release(&mut self, handle: &DeviceHandle) {
        self.state().released.push(handle.clone());
    }

    fn install_filter(&mut self, patterns: &[HwidPattern]) -> Result<(), CaptureError> {
        let patterns = patterns.iter().map(|p| p.as_str().to_string()).collect();
        self.state().filter_installs.push(patterns);
        Ok(())
    }

    fn list_devices(&mut self) -> Result<Vec<String>, CaptureError> {
        Ok(self.state().attached.iter().map(|d| d.hwid.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HWID: &str = r"USB\VID_1234&PID_0001\usb-1";

    fn pattern(p: &str) -> HwidPattern {
        HwidPattern::new(p).expect("valid pattern")
    }

    #[test]
    fn test_resolve_finds_attached_device() {
        // Arrange
        let mut mock = MockDeviceCapability::new();
        mock.attach("/dev/input/event1", HWID);

        // Act
        let handle = mock.resolve(&pattern(r"USB\\VID_1234")).unwrap();

        // Assert
        assert_eq!(handle, Some(DeviceHandle::new("/dev/input/event1", HWID)));
    }

    #[test]
    fn test_resolve_returns_none_when_nothing_matches() {
        let mut mock = MockDeviceCapability::new();
        mock.attach("/dev/input/event1", HWID);
        assert_eq!(mock.resolve(&pattern(r"USB\\VID_9999")).unwrap(), None);
    }

    #[test]
    fn test_resolve_reports_permission_denied() {
        let mut mock = MockDeviceCapability::new();
        mock.attach_denied("/dev/input/event1", HWID);
        assert!(matches!(
            mock.resolve(&pattern(".*")),
            Err(CaptureError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn test_poll_drains_pending_events() {
        // Arrange
        let mut mock = MockDeviceCapability::new();
        mock.attach("/dev/input/event1", HWID);
        mock.type_keys("/dev/input/event1", &[2, 28]);
        let handle = DeviceHandle::new("/dev/input/event1", HWID);

        // Act
        let first = mock.poll_events(&handle, Duration::ZERO).unwrap();
        let second = mock.poll_events(&handle, Duration::ZERO).unwrap();

        // Assert
        assert_eq!(first.len(), 4);
        assert!(second.is_empty());
        assert_eq!(mock.poll_count("/dev/input/event1"), 2);
    }

    #[test]
    fn test_poll_after_detach_reports_disconnected() {
        let mut mock = MockDeviceCapability::new();
        mock.attach("/dev/input/event1", HWID);
        let handle = DeviceHandle::new("/dev/input/event1", HWID);

        mock.detach("/dev/input/event1");

        assert!(matches!(
            mock.poll_events(&handle, Duration::ZERO),
            Err(CaptureError::Disconnected { .. })
        ));
    }

    #[test]
    fn test_scripted_io_failures_run_out() {
        let mut mock = MockDeviceCapability::new();
        mock.attach("/dev/input/event1", HWID);
        mock.fail_polls("/dev/input/event1", 1);
        let handle = DeviceHandle::new("/dev/input/event1", HWID);

        assert!(matches!(
            mock.poll_events(&handle, Duration::ZERO),
            Err(CaptureError::Io { .. })
        ));
        assert!(mock.poll_events(&handle, Duration::ZERO).is_ok());
    }

    #[test]
    fn test_clones_share_state() {
        // Arrange
        let driver = MockDeviceCapability::new();
        let mut owned = driver.clone();

        // Act
        driver.attach("/dev/input/event1", HWID);
        owned.release(&DeviceHandle::new("/dev/input/event1", HWID));

        // Assert
        assert_eq!(owned.list_devices().unwrap(), vec![HWID.to_string()]);
        assert_eq!(driver.released().len(), 1);
    }
}
