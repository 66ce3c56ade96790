//! TOML-driven runtime configuration.
//!
//! Precedence: built-in defaults, then the file (if any), then `SEQMQ_*`
//! environment variables.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::core::delivery::FlowControl;
use crate::core::publisher::PublisherConfig;
use crate::core::subscription::MAX_ACK_DEADLINE_SECS;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerConfig {
    pub default_ack_deadline_secs: u32,
    pub max_message_size_bytes: usize,
    pub max_ordering_key_bytes: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_ack_deadline_secs: 10,
            max_message_size_bytes: 10 * 1024 * 1024,
            max_ordering_key_bytes: 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_outstanding_messages: usize,
    pub ack_check_interval_ms: u64,
    pub drain_timeout_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_outstanding_messages: 1000,
            ack_check_interval_ms: 100,
            drain_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Parses TOML text without consulting the environment.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from an optional file path (falling back to `SEQMQ_CONFIG`)
    /// and applies environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let effective_path = path
            .map(str::to_owned)
            .or_else(|| env::var("SEQMQ_CONFIG").ok());

        let mut config = match effective_path {
            Some(p) => toml::from_str(&fs::read_to_string(p)?)?,
            None => Config::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SEQMQ_DEFAULT_ACK_DEADLINE_SECS") {
            self.broker.default_ack_deadline_secs = parse_env("SEQMQ_DEFAULT_ACK_DEADLINE_SECS", &v)?;
        }
        if let Some(v) = lookup("SEQMQ_MAX_MESSAGE_SIZE_BYTES") {
            self.broker.max_message_size_bytes = parse_env("SEQMQ_MAX_MESSAGE_SIZE_BYTES", &v)?;
        }
        if let Some(v) = lookup("SEQMQ_MAX_ORDERING_KEY_BYTES") {
            self.broker.max_ordering_key_bytes = parse_env("SEQMQ_MAX_ORDERING_KEY_BYTES", &v)?;
        }
        if let Some(v) = lookup("SEQMQ_MAX_OUTSTANDING_MESSAGES") {
            self.delivery.max_outstanding_messages = parse_env("SEQMQ_MAX_OUTSTANDING_MESSAGES", &v)?;
        }
        if let Some(v) = lookup("SEQMQ_ACK_CHECK_INTERVAL_MS") {
            self.delivery.ack_check_interval_ms = parse_env("SEQMQ_ACK_CHECK_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("SEQMQ_DRAIN_TIMEOUT_MS") {
            self.delivery.drain_timeout_ms = parse_env("SEQMQ_DRAIN_TIMEOUT_MS", &v)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let secs = self.broker.default_ack_deadline_secs;
        if secs == 0 || secs > MAX_ACK_DEADLINE_SECS {
            return Err(ConfigError::Invalid(format!(
                "broker.default_ack_deadline_secs must be within 1..={MAX_ACK_DEADLINE_SECS}, got {secs}"
            )));
        }
        if self.delivery.max_outstanding_messages == 0 {
            return Err(ConfigError::Invalid(
                "delivery.max_outstanding_messages must be at least 1".into(),
            ));
        }
        if self.delivery.ack_check_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "delivery.ack_check_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            max_message_size_bytes: self.broker.max_message_size_bytes,
            max_ordering_key_bytes: self.broker.max_ordering_key_bytes,
        }
    }

    pub fn flow_control(&self) -> FlowControl {
        FlowControl {
            max_outstanding_messages: self.delivery.max_outstanding_messages,
        }
    }

    pub fn ack_check_interval(&self) -> Duration {
        Duration::from_millis(self.delivery.ack_check_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery.drain_timeout_ms)
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ConfigError::Parse(format!("{key}: {e}")))
}

/// Loads configuration from a TOML file plus environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    Config::load(Some(&path.as_ref().to_string_lossy()))
}
