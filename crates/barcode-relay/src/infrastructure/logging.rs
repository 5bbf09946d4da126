//! Global `tracing` subscriber setup.
//!
//! Installed once by the binary after the configuration has loaded:
//!
//! - console output through `tracing-subscriber`'s `fmt` layer;
//! - an `EnvFilter` built from `[logging] level`, which `RUST_LOG` overrides;
//! - optionally, the same lines appended to `[logging] filepath` without
//!   ANSI colours.
//!
//! Library code never touches the subscriber; workers log inside their own
//! spans (`capture`, `device`, `sender`, `heartbeat`).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::infrastructure::storage::config::LoggingConfig;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("a global logger is already installed: {0}")]
    AlreadyInstalled(String),
}

/// Builds the level filter: `RUST_LOG` if set and valid, else `level`.
pub fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|e| LoggingError::Filter(e.to_string())),
    }
}

fn open_log_file(path: &Path) -> Result<File, LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::OpenFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails if the log file cannot be opened, the level is not a valid filter,
/// or a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(&config.level)?;

    let file_layer = match &config.filepath {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_file(path)?)),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))
}
