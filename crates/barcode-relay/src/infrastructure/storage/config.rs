//! TOML-based configuration for the relay.
//!
//! The configuration is read once at startup from `config/config.toml`
//! (relative to the working directory) unless another path is given on the
//! command line.  Unlike a desktop app there is no usable "first run" default:
//! the relay cannot guess which scanners to capture, so a missing file is an
//! error.
//!
//! # What is TOML? (for beginners)
//!
//! TOML (Tom's Obvious Minimal Language) is a configuration file format designed
//! to be easy to read and write.  Arrays of tables (`[[devices]]`) are how a
//! list of structured entries is written:
//!
//! ```toml
//! id = "warehouse-relay"
//!
//! [[devices]]
//! id = "dock-1"
//! hwid_regex = 'USB\\VID_1234.*'
//!
//! [[devices]]
//! id = "dock-2"
//! vid = 0x0c2e
//! pid = 0x0b61
//!
//! [target]
//! type = "redis_stream"
//! stream = "barcodes"
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file, so a minimal
//! file only needs the device list and the target.
//!
//! # Validation
//!
//! Parsing only checks the shape of the file.  [`AppConfig::validate`] checks
//! everything else (ids, patterns, sink type, intervals) and is always run by
//! [`load_config`], so no worker ever starts with a half-valid configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use relay_core::{DeviceSpec, HwidPattern, PatternError, TerminationPattern};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Path used when neither `--config` nor `BARCODE_RELAY_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file {path} not found")]
    NotFound { path: PathBuf },

    /// A file system I/O error occurred.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no devices configured")]
    NoDevices,

    #[error("device #{index} has an empty id")]
    EmptyDeviceId { index: usize },

    #[error("device id {0:?} is configured more than once")]
    DuplicateDeviceId(String),

    #[error("device {0:?} needs either hwid_regex or vid")]
    MissingHwid(String),

    #[error("device {device:?}: {source}")]
    InvalidPattern {
        device: String,
        #[source]
        source: PatternError,
    },

    /// Two devices would bind the same physical scanner.
    #[error("devices {first:?} and {second:?} share the hardware-id pattern {pattern:?}")]
    DuplicateHwidPattern {
        first: String,
        second: String,
        pattern: String,
    },

    #[error("unknown target type {0:?} (expected \"redis_stream\" or \"log\")")]
    UnknownSinkType(String),

    #[error("target type redis_stream requires a non-empty stream name")]
    MissingStream,

    #[error("target port must be between 1 and 65535")]
    InvalidPort,

    #[error("invalid log level {0:?} (expected error, warn, info, debug or trace)")]
    InvalidLogLevel(String),

    /// An interval or capacity that must be positive is zero.
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Relay id reported with every scan and heartbeat.
    #[serde(default = "default_relay_id")]
    pub id: String,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    pub target: TargetConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Capture loop and queue sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureConfig {
    /// Upper bound on one coordinator tick; every device is polled at least
    /// once per interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Relay queue capacity before capture blocks.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// One scanner to capture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub id: String,
    /// Regex matched from the start of the device's hardware id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hwid_regex: Option<String>,
    /// Regex that, matched from the start of the buffer, completes a scan.
    #[serde(default = "default_full_scan_regex")]
    pub full_scan_regex: String,
    /// USB vendor id; used when `hwid_regex` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,
    /// USB product id; narrows `vid`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
}

/// Where scans and heartbeats go.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetConfig {
    /// `"redis_stream"` or `"log"` (`"dummy"` is accepted as an alias).
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub stream: String,
    /// Fixed delay between failed delivery attempts of the same scan.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Periodic liveness signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
    /// Pub/sub channel used by the Redis sink.
    #[serde(default = "default_heartbeat_channel")]
    pub channel: String,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional file that receives a copy of every log line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filepath: Option<PathBuf>,
}

/// Sink implementation selected by `target.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    RedisStream,
    Log,
}

impl FromStr for SinkKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "redis_stream" => Ok(Self::RedisStream),
            "log" | "dummy" => Ok(Self::Log),
            other => Err(ConfigError::UnknownSinkType(other.to_string())),
        }
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_relay_id() -> String {
    "barcode-relay".to_string()
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_full_scan_regex() -> String {
    TerminationPattern::DEFAULT.to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    6379
}
fn default_retry_backoff_ms() -> u64 {
    5000
}
fn default_true() -> bool {
    true
}
fn default_heartbeat_interval_ms() -> u64 {
    10_000
}
fn default_heartbeat_channel() -> String {
    "barcode-relay-heartbeat".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            kind: "log".to_string(),
            host: default_host(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            stream: String::new(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_ms: default_heartbeat_interval_ms(),
            channel: default_heartbeat_channel(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            filepath: None,
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl DeviceConfig {
    /// Hardware-id pattern source: the explicit regex, else one derived from
    /// vid/pid.
    fn hwid_source(&self) -> Option<String> {
        match (&self.hwid_regex, self.vid) {
            (Some(regex), _) => Some(regex.clone()),
            (None, Some(vid)) => {
                Some(HwidPattern::from_vid_pid(vid, self.pid).as_str().to_string())
            }
            (None, None) => None,
        }
    }

    /// Compiles this entry into a [`DeviceSpec`].
    pub fn to_spec(&self) -> Result<DeviceSpec, ConfigError> {
        let hwid = self
            .hwid_source()
            .ok_or_else(|| ConfigError::MissingHwid(self.id.clone()))?;
        DeviceSpec::new(self.id.clone(), &hwid, &self.full_scan_regex).map_err(|source| {
            ConfigError::InvalidPattern {
                device: self.id.clone(),
                source,
            }
        })
    }
}

impl AppConfig {
    /// Checks every rule that parsing alone cannot express.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule as a distinct [`ConfigError`] variant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device_specs()?;

        let sink = self.sink_kind()?;
        if sink == SinkKind::RedisStream {
            if self.target.stream.trim().is_empty() {
                return Err(ConfigError::MissingStream);
            }
            if self.target.port == 0 {
                return Err(ConfigError::InvalidPort);
            }
        }

        tracing::Level::from_str(&self.logging.level)
            .map_err(|_| ConfigError::InvalidLogLevel(self.logging.level.clone()))?;

        if self.capture.poll_interval_ms == 0 {
            return Err(ConfigError::NotPositive("capture.poll_interval_ms"));
        }
        if self.capture.queue_capacity == 0 {
            return Err(ConfigError::NotPositive("capture.queue_capacity"));
        }
        if self.target.retry_backoff_ms == 0 {
            return Err(ConfigError::NotPositive("target.retry_backoff_ms"));
        }
        if self.heartbeat.enabled && self.heartbeat.interval_ms == 0 {
            return Err(ConfigError::NotPositive("heartbeat.interval_ms"));
        }
        Ok(())
    }

    /// Compiles the device list, rejecting empty or duplicate ids and
    /// textually identical hardware-id patterns.
    pub fn device_specs(&self) -> Result<Vec<DeviceSpec>, ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }

        let mut ids = HashSet::new();
        let mut specs: Vec<DeviceSpec> = Vec::with_capacity(self.devices.len());
        for (index, device) in self.devices.iter().enumerate() {
            if device.id.trim().is_empty() {
                return Err(ConfigError::EmptyDeviceId { index });
            }
            if !ids.insert(device.id.as_str()) {
                return Err(ConfigError::DuplicateDeviceId(device.id.clone()));
            }

            let spec = device.to_spec()?;
            if let Some(clash) = specs.iter().find(|s| s.hwid.as_str() == spec.hwid.as_str()) {
                return Err(ConfigError::DuplicateHwidPattern {
                    first: clash.id.clone(),
                    second: spec.id.clone(),
                    pattern: spec.hwid.as_str().to_string(),
                });
            }
            specs.push(spec);
        }
        Ok(specs)
    }

    pub fn sink_kind(&self) -> Result<SinkKind, ConfigError> {
        self.target.kind.parse()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.capture.poll_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.target.retry_backoff_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parses and validates configuration text.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let cfg: AppConfig = toml::from_str(content)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Loads and validates the configuration file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::NotFound`] if the file does not exist,
/// [`ConfigError::Io`] for other file-system errors, [`ConfigError::Parse`] if
/// the TOML is malformed, and a validation variant if a rule is violated.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
