//! MultiDeviceCoordinator: one cooperative capture loop over every scanner.
//!
//! The coordinator owns, per configured device, a [`ScanFramer`] and the
//! device's connection state.  Nothing else ever touches them, so no locking
//! is needed on the capture path; the only shared resource is the relay
//! queue the finished scans are pushed onto.
//!
//! # Connection lifecycle (for beginners)
//!
//! ```text
//!                 resolve() finds a handle
//!  Disconnected  ────────────────────────────►  Connected
//!       ▲                                           │
//!       │  resolve() finds nothing / another handle │
//!       │  poll reports the device gone             │
//!       └───────────────────────────────────────────┘
//! ```
//!
//! Every tick re-resolves every device.  Entering `Connected` (including a
//! reconnect or a swap to a different physical device) always clears the
//! device's partial scan, and reinstalls the capability's event filter for
//! the full configured device set, at most once per tick.
//!
//! # Fairness
//!
//! Connected devices are polled in configuration order with a timeout of
//! `poll_interval / device_count`, so one tick never takes longer than one
//! polling interval and every device gets at least one poll per interval.
//! When a tick sees no key events at all, [`MultiDeviceCoordinator::run`]
//! sleeps out the rest of the interval instead of spinning.
//!
//! # Failures
//!
//! Nothing here is fatal.  A missing device is simply `Disconnected`; a
//! permission problem is warned about once per disconnected episode; any
//! other capture error fails that device's tick only.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use relay_core::{
    DeviceSpec, HwidPattern, KeyDecoder, QueueError, QueueProducer, ScanFramer, StopSignal,
};
use tracing::{debug, error, info, info_span, warn, Span};

use super::display_code;
use crate::infrastructure::device_capture::{CaptureError, DeviceCapability, DeviceHandle};

/// Lower bound on a single device poll, however many devices are configured.
pub const MIN_DEVICE_POLL: Duration = Duration::from_millis(1);

/// Connection state of one configured device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No physical device is bound; retried every tick.
    Disconnected,
    /// A handle is open and polled every tick.
    Connected,
}

/// Runtime state for one configured device, owned by the coordinator.
pub struct DeviceRuntimeState {
    spec: DeviceSpec,
    framer: ScanFramer,
    handle: Option<DeviceHandle>,
    permission_warned: bool,
    refused_claim: Option<DeviceHandle>,
    span: Span,
}

impl DeviceRuntimeState {
    fn new(spec: DeviceSpec, decoder: Arc<dyn KeyDecoder>) -> Self {
        let span = info_span!("device", device = %spec.id);
        let framer = ScanFramer::for_device(&spec, decoder);
        Self {
            spec,
            framer,
            handle: None,
            permission_warned: false,
            refused_claim: None,
            span,
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn spec(&self) -> &DeviceSpec {
        &self.spec
    }

    pub fn state(&self) -> ConnectionState {
        if self.handle.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn handle(&self) -> Option<&DeviceHandle> {
        self.handle.as_ref()
    }

    /// Partial scan accumulated so far.
    pub fn buffer(&self) -> &str {
        self.framer.buffer()
    }
}

/// A connection state change observed during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Connected { device: String, handle: DeviceHandle },
    Disconnected { device: String },
}

/// What one [`MultiDeviceCoordinator::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Raw key events read across all devices.
    pub events: usize,
    /// Scans framed and pushed onto the relay queue.
    pub scans: usize,
    pub transitions: Vec<Transition>,
    /// Whether the event filter was reinstalled this tick.
    pub filter_installed: bool,
}

/// Drives capture for every configured device.
pub struct MultiDeviceCoordinator<C: DeviceCapability> {
    capability: C,
    devices: Vec<DeviceRuntimeState>,
    producer: QueueProducer,
    stop: StopSignal,
    poll_interval: Duration,
    span: Span,
}

impl<C: DeviceCapability> MultiDeviceCoordinator<C> {
    pub fn new(
        capability: C,
        specs: Vec<DeviceSpec>,
        decoder: Arc<dyn KeyDecoder>,
        producer: QueueProducer,
        stop: StopSignal,
        poll_interval: Duration,
    ) -> Self {
        let devices = specs
            .into_iter()
            .map(|spec| DeviceRuntimeState::new(spec, Arc::clone(&decoder)))
            .collect();
        Self {
            capability,
            devices,
            producer,
            stop,
            poll_interval,
            span: info_span!("capture"),
        }
    }

    pub fn devices(&self) -> &[DeviceRuntimeState] {
        &self.devices
    }

    pub fn device(&self, id: &str) -> Option<&DeviceRuntimeState> {
        self.devices.iter().find(|d| d.spec.id == id)
    }

    /// Timeout given to each connected device's poll.
    pub fn device_poll_timeout(&self) -> Duration {
        let count = u32::try_from(self.devices.len().max(1)).unwrap_or(u32::MAX);
        (self.poll_interval / count).max(MIN_DEVICE_POLL)
    }

    /// Runs one pass over every device: resolve, transition, poll, frame.
    ///
    /// # Errors
    ///
    /// Only the relay queue can fail a tick: [`QueueError::Stopped`] when stop
    /// was requested while the queue was full, [`QueueError::Disconnected`]
    /// when the sender side is gone.  The scan being pushed is lost.
    pub fn tick(&mut self) -> Result<TickReport, QueueError> {
        let mut report = TickReport::default();

        if let Err(e) = self.capability.refresh() {
            warn!("device enumeration failed: {e}");
        }

        let mut entered_connected = false;
        for index in 0..self.devices.len() {
            entered_connected |= self.update_connection(index, &mut report);
        }
        if entered_connected {
            self.reinstall_filter();
            report.filter_installed = true;
        }

        let timeout = self.device_poll_timeout();
        for index in 0..self.devices.len() {
            if self.stop.is_stopped() {
                break;
            }
            self.poll_device(index, timeout, &mut report)?;
        }
        Ok(report)
    }

    /// Loops until stop is requested or the relay queue closes, then releases
    /// every device.
    pub fn run(mut self) {
        let span = self.span.clone();
        let _enter = span.enter();
        info!(
            devices = self.devices.len(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "capture started"
        );

        while !self.stop.is_stopped() {
            let started = Instant::now();
            match self.tick() {
                Ok(report) if report.events == 0 => {
                    let rest = self.poll_interval.saturating_sub(started.elapsed());
                    if self.stop.wait(rest) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(QueueError::Stopped) => {
                    info!("stop requested while the relay queue was full; pending scan dropped");
                    break;
                }
                Err(QueueError::Disconnected) => {
                    error!("relay queue closed; capture stopping");
                    break;
                }
            }
        }

        self.release_all();
        info!("capture stopped");
    }

    /// Runs [`run`](Self::run) on a thread named `relay-capture`.
    pub fn spawn(self) -> io::Result<JoinHandle<()>>
    where
        C: 'static,
    {
        thread::Builder::new()
            .name("relay-capture".to_string())
            .spawn(move || self.run())
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Re-resolves one device and applies any transition.  Returns `true` when
    /// the device entered `Connected`.
    fn update_connection(&mut self, index: usize, report: &mut TickReport) -> bool {
        let span = self.devices[index].span.clone();
        let _enter = span.enter();

        let resolved = match self.capability.resolve(&self.devices[index].spec.hwid) {
            Ok(resolved) => resolved,
            Err(CaptureError::PermissionDenied { node }) => {
                let device = &mut self.devices[index];
                if !device.permission_warned {
                    warn!("permission denied opening {node}; will keep retrying");
                    device.permission_warned = true;
                }
                None
            }
            Err(e) => {
                warn!("device lookup failed: {e}");
                return false;
            }
        };

        let resolved = match resolved {
            Some(handle) => match self.claimed_by(index, &handle) {
                Some(owner) => {
                    let device = &mut self.devices[index];
                    if device.refused_claim.as_ref() != Some(&handle) {
                        error!(
                            "configuration error: {handle} is already bound to device {owner:?}; \
                             hardware-id patterns must not overlap"
                        );
                        device.refused_claim = Some(handle);
                    }
                    None
                }
                None => Some(handle),
            },
            None => None,
        };
        if resolved.is_some() {
            self.devices[index].refused_claim = None;
        }

        if self.devices[index].handle == resolved {
            return false;
        }

        self.disconnect(index, report);

        let Some(handle) = resolved else {
            return false;
        };
        let device = &mut self.devices[index];
        device.framer.reset();
        device.permission_warned = false;
        info!("device connected: {handle}");
        report.transitions.push(Transition::Connected {
            device: device.spec.id.clone(),
            handle: handle.clone(),
        });
        device.handle = Some(handle);
        true
    }

    /// Id of another device already bound to `handle`, if any.
    fn claimed_by(&self, index: usize, handle: &DeviceHandle) -> Option<String> {
        self.devices
            .iter()
            .enumerate()
            .find(|(other, d)| *other != index && d.handle.as_ref() == Some(handle))
            .map(|(_, d)| d.spec.id.clone())
    }

    fn disconnect(&mut self, index: usize, report: &mut TickReport) {
        let device = &mut self.devices[index];
        if let Some(handle) = device.handle.take() {
            self.capability.release(&handle);
            info!("device disconnected: {handle}");
            report.transitions.push(Transition::Disconnected {
                device: device.spec.id.clone(),
            });
        }
    }

    fn poll_device(
        &mut self,
        index: usize,
        timeout: Duration,
        report: &mut TickReport,
    ) -> Result<(), QueueError> {
        let Some(handle) = self.devices[index].handle.clone() else {
            return Ok(());
        };
        let span = self.devices[index].span.clone();
        let _enter = span.enter();

        match self.capability.poll_events(&handle, timeout) {
            Ok(events) => {
                report.events += events.len();
                for event in events {
                    let Some(scan) = self.devices[index].framer.feed(event) else {
                        continue;
                    };
                    info!(code = %display_code(&scan.text), "scan captured");
                    let sequence = self.producer.push(scan, &self.stop)?;
                    debug!(sequence, "scan queued");
                    report.scans += 1;
                }
            }
            Err(e @ (CaptureError::Disconnected { .. } | CaptureError::NotFound { .. })) => {
                debug!("{e}");
                self.disconnect(index, report);
            }
            Err(e) => warn!("reading device failed: {e}"),
        }
        Ok(())
    }

    /// Installs one filter covering every configured device.
    fn reinstall_filter(&mut self) {
        let patterns: Vec<HwidPattern> = self.devices.iter().map(|d| d.spec.hwid.clone()).collect();
        if let Err(e) = self.capability.install_filter(&patterns) {
            error!("failed to install device filter: {e}");
        }
    }

    fn release_all(&mut self) {
        let mut report = TickReport::default();
        for index in 0..self.devices.len() {
            self.disconnect(index, &mut report);
        }
    }
}

// ── Device listing ────────────────────────────────────────────────────────────

/// One attached hardware id and the configured devices whose pattern matches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwidMatch {
    pub hwid: String,
    pub devices: Vec<String>,
}

impl HwidMatch {
    /// More than one configured pattern matches this hardware id.
    pub fn is_overlap(&self) -> bool {
        self.devices.len() > 1
    }
}

/// Annotates each attached hardware id with the devices that would bind it.
pub fn match_attached_devices(specs: &[DeviceSpec], hwids: &[String]) -> Vec<HwidMatch> {
    hwids
        .iter()
        .map(|hwid| HwidMatch {
            hwid: hwid.clone(),
            devices: specs
                .iter()
                .filter(|spec| spec.hwid.matches(hwid))
                .map(|spec| spec.id.clone())
                .collect(),
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
