use std::{collections::BTreeMap, path::Path, time::Duration};

use crate::harness::DEFAULT_SETTLE_TIME;
use crate::relay::{default_mapping, PinMapping, RelayId, NANO_PIN_COUNT};

/// Settings of a test run, usually read from `config.toml`:
///
/// ```toml
/// port = "/dev/ttyUSB0"
/// settle_time_ms = 200
/// loop_relay = "relay2"
///
/// [relays.relay1]
/// control_pin = 6
/// state_pin = 2
/// ```
///
/// Everything but `port` is optional.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Serial port the board is attached to, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// How long to wait for the first sample of every state pin after connecting
    #[serde(default = "default_sample_timeout_ms")]
    pub sample_timeout_ms: u64,
    /// Time a relay needs until its state pin follows a command
    #[serde(default = "default_settle_time_ms")]
    pub settle_time_ms: u64,
    #[serde(default = "default_log_path")]
    pub log_path: String,
    /// Relay toggled by the binary
    #[serde(default = "default_loop_relay")]
    pub loop_relay: RelayId,
    /// Number of toggle cycles, unlimited if absent
    #[serde(default)]
    pub cycles: Option<u64>,
    /// Number of digital pins of the board, mapped pins must lie below it
    #[serde(default = "default_pin_count")]
    pub pin_count: u8,
    #[serde(default = "default_mapping")]
    pub relays: BTreeMap<RelayId, PinMapping>,
}

fn default_baudrate() -> u32 {
    57600
}

fn default_read_timeout_ms() -> u64 {
    100
}

fn default_handshake_timeout_ms() -> u64 {
    5000
}

fn default_sample_timeout_ms() -> u64 {
    1000
}

fn default_settle_time_ms() -> u64 {
    DEFAULT_SETTLE_TIME.as_millis() as u64
}

fn default_log_path() -> String {
    "log".into()
}

fn default_pin_count() -> u8 {
    NANO_PIN_COUNT
}

fn default_loop_relay() -> RelayId {
    RelayId::Relay2
}

impl Configuration {
    /// Default settings for the board on `port`
    pub fn new(port: &str) -> Self {
        Configuration {
            port: port.to_owned(),
            baudrate: default_baudrate(),
            read_timeout_ms: default_read_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            sample_timeout_ms: default_sample_timeout_ms(),
            settle_time_ms: default_settle_time_ms(),
            log_path: default_log_path(),
            loop_relay: default_loop_relay(),
            cycles: None,
            pin_count: default_pin_count(),
            relays: default_mapping(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms)
    }

    pub fn settle_time(&self) -> Duration {
        Duration::from_millis(self.settle_time_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not read {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
