//! Barcode Relay entry point.
//!
//! Parses the command line, loads the configuration, installs logging and then
//! runs one of three modes:
//!
//! ```text
//! barcode-relay                 run: capture + delivery + heartbeat until Ctrl-C
//! barcode-relay --list          print attached keyboard hardware ids
//! barcode-relay --test CODE     deliver one scan through the configured sink
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config() + init_logging()
//!  └─ run mode
//!       ├─ RelayPipeline::start()   (relay-capture + relay-sender threads)
//!       ├─ HeartbeatEmitter::start() (relay-heartbeat thread)
//!       └─ ctrl_c().await  ──►  spawn_blocking(stop + join)
//! ```
//!
//! Any error before the workers start (configuration, sink type, unsupported
//! platform) is returned from `main`, which exits with status 1.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use barcode_relay::application::coordinator::match_attached_devices;
use barcode_relay::application::heartbeat::HeartbeatEmitter;
use barcode_relay::application::pipeline::{PipelineSettings, RelayPipeline};
use barcode_relay::infrastructure::device_capture::platform_capability;
use barcode_relay::infrastructure::logging::init_logging;
use barcode_relay::infrastructure::sink::build_sink;
use barcode_relay::infrastructure::storage::config::{
    load_config, AppConfig, LoggingConfig, DEFAULT_CONFIG_PATH,
};
use relay_core::{LinuxKeyDecoder, ScanEvent};

/// How long test mode waits for the sink to accept the test scan.
const TEST_DELIVERY_TIMEOUT: Duration = Duration::from_secs(1);

// ── Command-line interface ────────────────────────────────────────────────────

/// Relays barcode scanner input from local keyboard devices to a message sink.
#[derive(Debug, Parser)]
#[command(name = "barcode-relay", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        default_value = DEFAULT_CONFIG_PATH,
        env = "BARCODE_RELAY_CONFIG"
    )]
    config: PathBuf,

    /// Print the hardware ids of attached keyboard devices and exit.
    ///
    /// When the configuration loads, each id is annotated with the configured
    /// devices whose pattern matches it.
    #[arg(short, long)]
    list: bool,

    /// Deliver CODE once as a scan from the first configured device and exit.
    #[arg(short, long, value_name = "CODE", conflicts_with = "list")]
    test: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.list {
        return list_devices(&cli.config);
    }

    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    init_logging(&config.logging).context("failed to initialise logging")?;

    match cli.test {
        Some(code) => test_send(&config, code),
        None => run(config).await,
    }
}

// ── Modes ─────────────────────────────────────────────────────────────────────

async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!(relay = %config.id, devices = config.devices.len(), "barcode relay starting");

    let specs = config.device_specs().context("invalid device configuration")?;
    let capability = platform_capability().context("device capture is not available")?;
    let sink = build_sink(&config).context("failed to build the scan sink")?;

    let mut pipeline = RelayPipeline::start(
        capability,
        specs,
        Arc::new(LinuxKeyDecoder::new()),
        sink,
        PipelineSettings::from_config(&config),
    )
    .context("failed to start the relay pipeline")?;

    let mut heartbeat = if config.heartbeat.enabled {
        let sink = build_sink(&config).context("failed to build the heartbeat sink")?;
        let mut emitter =
            HeartbeatEmitter::new(config.id.clone(), config.heartbeat_interval(), sink);
        emitter.start().context("failed to start the heartbeat")?;
        Some(emitter)
    } else {
        info!("heartbeat disabled");
        None
    };

    info!("barcode relay ready.  Press Ctrl-C to exit.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl-C: {e}; shutting down");
    }
    info!("shutdown signal received");

    tokio::task::spawn_blocking(move || {
        if let Some(emitter) = heartbeat.as_mut() {
            emitter.stop();
        }
        pipeline.stop();
    })
    .await
    .context("shutdown task failed")?;

    info!("barcode relay stopped");
    Ok(())
}

fn test_send(config: &AppConfig, code: String) -> anyhow::Result<()> {
    let Some(device) = config.devices.first() else {
        bail!("no devices configured");
    };
    let sink = build_sink(config).context("failed to build the scan sink")?;
    let mut pipeline = RelayPipeline::start_sender_only(sink, PipelineSettings::from_config(config))
        .context("failed to start the delivery sender")?;

    let scan = ScanEvent::new(device.id.clone(), code, relay_core::unix_timestamp());
    info!(device = %device.id, "sending test scan");
    pipeline
        .producer()
        .push(scan, &pipeline.stop_signal())
        .context("failed to queue the test scan")?;

    let stats = pipeline.stats();
    let started = Instant::now();
    while stats.delivered() == 0 && started.elapsed() < TEST_DELIVERY_TIMEOUT {
        std::thread::sleep(Duration::from_millis(10));
    }
    pipeline.stop();

    if stats.delivered() == 0 {
        warn!(
            failed_attempts = stats.failed_attempts(),
            "test scan was not delivered within {TEST_DELIVERY_TIMEOUT:?}"
        );
    } else {
        info!("test scan delivered");
    }
    Ok(())
}

fn list_devices(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path);
    let logging = match &config {
        Ok(config) => config.logging.clone(),
        Err(_) => LoggingConfig::default(),
    };
    init_logging(&logging).context("failed to initialise logging")?;

    let mut capability = platform_capability().context("device capture is not available")?;
    let hwids = capability
        .list_devices()
        .context("failed to enumerate input devices")?;

    let specs = match config.and_then(|c| c.device_specs()) {
        Ok(specs) => Some(specs),
        Err(e) => {
            info!("configuration not loaded ({e}); listing devices only");
            None
        }
    };

    if hwids.is_empty() {
        println!("no keyboard devices found");
        return Ok(());
    }
    match specs {
        Some(specs) => {
            for entry in match_attached_devices(&specs, &hwids) {
                let annotation = match entry.devices.as_slice() {
                    [] => String::new(),
                    [only] => format!("  <- {only}"),
                    many => format!("  <- OVERLAP: {}", many.join(", ")),
                };
                println!("{}{annotation}", entry.hwid);
            }
        }
        None => {
            for hwid in &hwids {
                println!("{hwid}");
            }
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_defaults_to_run_mode() {
        // Arrange: parse with no arguments (all defaults apply)
        let cli = Cli::parse_from(["barcode-relay"]);

        // Assert
        assert!(!cli.list);
        assert!(cli.test.is_none());
    }

    #[test]
    fn test_cli_accepts_short_config_flag() {
        let cli = Cli::parse_from(["barcode-relay", "-c", "/etc/relay.toml"]);
        assert_eq!(cli.config, PathBuf::from("/etc/relay.toml"));
    }

    #[test]
    fn test_cli_test_mode_takes_code() {
        let cli = Cli::parse_from(["barcode-relay", "--test", "12345"]);
        assert_eq!(cli.test.as_deref(), Some("12345"));
    }

    #[test]
    fn test_cli_list_flag() {
        let cli = Cli::parse_from(["barcode-relay", "-l"]);
        assert!(cli.list);
    }

    #[test]
    fn test_cli_rejects_list_with_test() {
        let result = Cli::try_parse_from(["barcode-relay", "--list", "--test", "1"]);
        assert!(result.is_err());
    }
}
