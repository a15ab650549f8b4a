//! Configuration loading traits and types.
//!
//! One TOML file (`node.toml`) configures the whole node binary. Loading
//! is strict (`deny_unknown_fields`) so typos surface at boot instead of
//! silently falling back to defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts;

/// Log level for configuration.
///
/// Serializes to lowercase strings: "trace", "debug", "info", "warn", "error".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string for the tracing env-filter.
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Common configuration fields shared across GAIA binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedConfig {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    pub service_name: String,
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl SharedConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            service_name: "gaia_node".to_string(),
        }
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_s: u64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    30
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            keep_alive_s: 30,
            username: None,
            password: None,
        }
    }
}

/// Out-of-band processing endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessingConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_processing_timeout")]
    pub timeout_ms: u64,
}

fn default_processing_timeout() -> u64 {
    consts::PROCESSING_TIMEOUT_MS
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8431,
            timeout_ms: consts::PROCESSING_TIMEOUT_MS,
        }
    }
}

/// Loop cadence overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimingConfig {
    #[serde(default = "default_measurement")]
    pub measurement_interval_ms: u64,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_health")]
    pub health_interval_ms: u64,
    #[serde(default = "default_status")]
    pub status_interval_ms: u64,
}

fn default_measurement() -> u64 {
    consts::MEASUREMENT_INTERVAL_MS
}

fn default_heartbeat() -> u64 {
    consts::HEARTBEAT_INTERVAL_MS
}

fn default_health() -> u64 {
    consts::HEALTH_INTERVAL_MS
}

fn default_status() -> u64 {
    consts::ACTUATOR_STATUS_INTERVAL_MS
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            measurement_interval_ms: default_measurement(),
            heartbeat_interval_ms: default_heartbeat(),
            health_interval_ms: default_health(),
            status_interval_ms: default_status(),
        }
    }
}

/// Persistent storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: String,
}

fn default_storage_dir() -> String {
    "data".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

/// Full node configuration (`node.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    #[serde(default)]
    pub shared: SharedConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl NodeConfig {
    /// Parse from a TOML string.
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(input).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound)?;
        Self::from_toml(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        if self.broker.host.is_empty() {
            return Err(ConfigError::ValidationError(
                "broker.host cannot be empty".to_string(),
            ));
        }
        if self.timing.measurement_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timing.measurement_interval_ms must be > 0".to_string(),
            ));
        }
        if self.timing.heartbeat_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timing.heartbeat_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.broker.port, 1883);
        assert_eq!(
            config.timing.measurement_interval_ms,
            consts::MEASUREMENT_INTERVAL_MS
        );
    }

    #[test]
    fn full_toml_round_trip() {
        let toml_str = r#"
[shared]
log_level = "debug"
service_name = "gaia_node"

[broker]
host = "broker.local"
port = 8883
keep_alive_s = 15

[processing]
host = "kaiser.local"
port = 8431
timeout_ms = 3000

[timing]
measurement_interval_ms = 10000

[storage]
dir = "/var/lib/gaia"
"#;
        let config = NodeConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.shared.log_level, LogLevel::Debug);
        assert_eq!(config.broker.host, "broker.local");
        assert_eq!(config.processing.timeout_ms, 3000);
        assert_eq!(config.timing.measurement_interval_ms, 10_000);
        assert_eq!(config.timing.heartbeat_interval_ms, 60_000);
        assert_eq!(config.storage.dir, "/var/lib/gaia");
    }

    #[test]
    fn unknown_field_rejected() {
        let toml_str = r#"
[broker]
host = "x"
prot = 1883
"#;
        assert!(matches!(
            NodeConfig::from_toml(toml_str),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn zero_measurement_interval_rejected() {
        let toml_str = r#"
[timing]
measurement_interval_ms = 0
"#;
        assert!(matches!(
            NodeConfig::from_toml(toml_str),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn missing_file_reported() {
        let err = NodeConfig::load(Path::new("/nonexistent/node.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound));
    }
}
