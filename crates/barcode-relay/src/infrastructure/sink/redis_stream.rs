//! Redis sink: scans go to a stream, heartbeats to a pub/sub channel.
//!
//! # Wire format
//!
//! ```text
//! XADD <stream> * relay <relay-id> device <device-id> code <text> ts <unix-seconds>
//! PUBLISH <channel> {"relay":"<relay-id>","ts":<unix-seconds>}
//! ```
//!
//! # Connection handling
//!
//! The connection is opened lazily on the first delivery and dropped after
//! any error, so the next attempt (the delivery sender retries after its
//! backoff) starts from a fresh connection.
//!
//! One attempt makes up to three blocking steps (connect, `AUTH`, the
//! command).  Each step gets a third of the retry backoff, capped at
//! [`MAX_STEP_TIMEOUT`], so a dead server never holds a worker past a stop
//! request for longer than one backoff.

use std::time::Duration;

use redis::{Cmd, Connection, FromRedisValue};
use relay_core::HeartbeatMessage;
use tracing::{debug, info};

use super::{Sink, SinkError};
use crate::infrastructure::storage::config::AppConfig;

/// Upper bound for the connect timeout and for each read or write.
pub const MAX_STEP_TIMEOUT: Duration = Duration::from_secs(3);
const MIN_STEP_TIMEOUT: Duration = Duration::from_millis(1);

/// Connection and naming settings, taken from `[target]` and `[heartbeat]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    pub relay_id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub stream: String,
    pub heartbeat_channel: String,
    /// Connect timeout, also applied to every read and write.
    pub step_timeout: Duration,
}

impl RedisSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            relay_id: config.id.clone(),
            host: config.target.host.clone(),
            port: config.target.port,
            username: non_empty(&config.target.username),
            password: non_empty(&config.target.password),
            stream: config.target.stream.clone(),
            heartbeat_channel: config.heartbeat.channel.clone(),
            step_timeout: step_timeout(config.retry_backoff()),
        }
    }
}

/// Splits `retry_backoff` across the three blocking steps of one attempt.
fn step_timeout(retry_backoff: Duration) -> Duration {
    (retry_backoff / 3).clamp(MIN_STEP_TIMEOUT, MAX_STEP_TIMEOUT)
}

pub struct RedisStreamSink {
    settings: RedisSettings,
    connection: Option<Connection>,
}

impl RedisStreamSink {
    pub fn new(settings: RedisSettings) -> Self {
        Self {
            settings,
            connection: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// The `XADD` command for one scan.
    pub fn scan_command(&self, device_id: &str, text: &str, timestamp: i64) -> Cmd {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.settings.stream)
            .arg("*")
            .arg("relay")
            .arg(&self.settings.relay_id)
            .arg("device")
            .arg(device_id)
            .arg("code")
            .arg(text)
            .arg("ts")
            .arg(timestamp);
        cmd
    }

    /// The `PUBLISH` command for one heartbeat.
    pub fn heartbeat_command(&self, relay_id: &str, timestamp: i64) -> Result<Cmd, SinkError> {
        let payload = serde_json::to_string(&HeartbeatMessage {
            relay_id: relay_id.to_string(),
            timestamp,
        })?;
        let mut cmd = redis::cmd("PUBLISH");
        cmd.arg(&self.settings.heartbeat_channel).arg(payload);
        Ok(cmd)
    }

    fn connect(&self) -> Result<Connection, SinkError> {
        let client = redis::Client::open((self.settings.host.as_str(), self.settings.port))?;
        let timeout = self.settings.step_timeout;
        let mut connection = client.get_connection_with_timeout(timeout)?;
        connection.set_read_timeout(Some(timeout))?;
        connection.set_write_timeout(Some(timeout))?;

        if let Some(password) = &self.settings.password {
            let mut auth = redis::cmd("AUTH");
            if let Some(username) = &self.settings.username {
                auth.arg(username);
            }
            auth.arg(password).query::<()>(&mut connection)?;
        }

        info!(
            "connected to redis at {}:{}",
            self.settings.host, self.settings.port
        );
        Ok(connection)
    }

    fn query<T: FromRedisValue>(&mut self, cmd: &Cmd) -> Result<T, SinkError> {
        if self.connection.is_none() {
            self.connection = Some(self.connect()?);
        }
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| SinkError::Unavailable("redis connection missing".to_string()))?;

        let result = cmd.query::<T>(connection);
        if result.is_err() {
            self.connection = None;
        }
        Ok(result?)
    }
}

impl Sink for RedisStreamSink {
    fn send_scan(&mut self, device_id: &str, text: &str, timestamp: i64) -> Result<(), SinkError> {
        let cmd = self.scan_command(device_id, text, timestamp);
        let entry_id: String = self.query(&cmd)?;
        debug!(stream = %self.settings.stream, %entry_id, "scan appended");
        Ok(())
    }

    fn send_heartbeat(&mut self, relay_id: &str, timestamp: i64) -> Result<(), SinkError> {
        let cmd = self.heartbeat_command(relay_id, timestamp)?;
        let receivers: i64 = self.query(&cmd)?;
        debug!(channel = %self.settings.heartbeat_channel, receivers, "heartbeat published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RedisSettings {
        RedisSettings {
            relay_id: "relay-1".to_string(),
            host: "127.0.0.1".to_string(),
            // Nothing listens on port 1.
            port: 1,
            username: None,
            password: None,
            stream: "scans".to_string(),
            heartbeat_channel: "hb".to_string(),
            step_timeout: Duration::from_millis(200),
        }
    }

    fn packed(cmd: &Cmd) -> String {
        String::from_utf8_lossy(&cmd.get_packed_command()).into_owned()
    }

    #[test]
    fn test_scan_command_carries_all_fields_in_order() {
        // Arrange
        let sink = RedisStreamSink::new(settings());

        // Act
        let wire = packed(&sink.scan_command("front-desk", "12345\n", 1_700_000_000));

        // Assert
        let expected = [
            "XADD", "scans", "*", "relay", "relay-1", "device", "front-desk", "code", "12345\n",
            "ts", "1700000000",
        ];
        let mut position = 0;
        for part in expected {
            let found = wire[position..]
                .find(part)
                .unwrap_or_else(|| panic!("{part:?} missing or out of order in {wire:?}"));
            position += found + part.len();
        }
    }

    #[test]
    fn test_heartbeat_command_publishes_json_payload() {
        let sink = RedisStreamSink::new(settings());

        let wire = packed(&sink.heartbeat_command("relay-1", 42).unwrap());

        assert!(wire.contains("PUBLISH"));
        assert!(wire.contains("hb"));
        assert!(wire.contains(r#"{"relay":"relay-1","ts":42}"#));
    }

    #[test]
    fn test_failed_delivery_leaves_sink_disconnected() {
        // Arrange
        let mut sink = RedisStreamSink::new(settings());

        // Act
        let result = sink.send_scan("d1", "1\n", 0);

        // Assert
        assert!(result.is_err());
        assert!(!sink.is_connected());
    }

    #[test]
    fn test_settings_treat_empty_credentials_as_absent() {
        // Arrange
        let cfg = crate::infrastructure::storage::config::parse_config(
            "[[devices]]\nid = \"d\"\nvid = 1\n\
             [target]\ntype = \"redis_stream\"\nstream = \"s\"\npassword = \"secret\"\n",
        )
        .unwrap();

        // Act
        let settings = RedisSettings::from_config(&cfg);

        // Assert
        assert_eq!(settings.username, None);
        assert_eq!(settings.password.as_deref(), Some("secret"));
        assert_eq!(settings.heartbeat_channel, "barcode-relay-heartbeat");
    }

    #[test]
    fn test_default_backoff_bounds_one_attempt() {
        // Arrange – default retry_backoff_ms is 5000
        let cfg = crate::infrastructure::storage::config::parse_config(
            "[[devices]]\nid = \"d\"\nvid = 1\n\
             [target]\ntype = \"redis_stream\"\nstream = \"s\"\n",
        )
        .unwrap();

        // Act
        let settings = RedisSettings::from_config(&cfg);

        // Assert – connect + AUTH + command fit inside one backoff
        assert!(settings.step_timeout * 3 <= cfg.retry_backoff());
        assert!(settings.step_timeout <= MAX_STEP_TIMEOUT);
    }

    #[test]
    fn test_step_timeout_follows_backoff_within_bounds() {
        assert_eq!(step_timeout(Duration::from_millis(300)), Duration::from_millis(100));
        assert_eq!(step_timeout(Duration::from_secs(60)), MAX_STEP_TIMEOUT);
        assert_eq!(step_timeout(Duration::from_millis(1)), MIN_STEP_TIMEOUT);
    }
}
