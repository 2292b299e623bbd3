//! Bridge configuration types and defaults.
//!
//! This module defines the tunables of the cross-thread bridge: queue bound,
//! optional bounded wait for request events, pump batch size, re-entrancy
//! detection and the size of the out-of-band error channel.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default bound on queued deliveries
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default number of retained error reports
pub const DEFAULT_ERROR_REPORT_CAPACITY: usize = 256;

/// Configuration for the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Maximum queued deliveries before producers get a resource error (0 = unbounded)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Bounded wait for request events in milliseconds (None = wait for reply or shutdown)
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// Maximum deliveries processed per pump (0 = everything queued at entry)
    #[serde(default)]
    pub max_pump_batch: usize,

    /// Fail fast when a request event is raised on the host thread itself
    #[serde(default = "default_true")]
    pub detect_reentry: bool,

    /// Number of error reports retained in the side channel
    #[serde(default = "default_error_report_capacity")]
    pub error_report_capacity: usize,

    /// Enable debug logging of every delivery (default: false)
    #[serde(default)]
    pub debug: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_timeout_ms: None,
            max_pump_batch: 0,
            detect_reentry: true,
            error_report_capacity: DEFAULT_ERROR_REPORT_CAPACITY,
            debug: false,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the bounded wait for request events
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Set the maximum pump batch
    pub fn with_max_pump_batch(mut self, batch: usize) -> Self {
        self.max_pump_batch = batch;
        self
    }

    /// Enable or disable re-entrancy detection
    pub fn with_reentry_detection(mut self, enable: bool) -> Self {
        self.detect_reentry = enable;
        self
    }

    /// Set the error report capacity
    pub fn with_error_report_capacity(mut self, capacity: usize) -> Self {
        self.error_report_capacity = capacity;
        self
    }

    /// Enable debug mode
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Request timeout as a duration
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Parse a configuration from JSON
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms".into(),
                reason: "must be greater than 0 when set".into(),
            });
        }

        if self.error_report_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "error_report_capacity".into(),
                reason: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field name
        field: String,
        /// The reason it's invalid
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Default value functions for serde
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_error_report_capacity() -> usize {
    DEFAULT_ERROR_REPORT_CAPACITY
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(config.request_timeout().is_none());
        assert!(config.detect_reentry);
        assert!(!config.debug);
    }

    #[test]
    fn test_config_builder() {
        let config = BridgeConfig::new()
            .with_queue_capacity(8)
            .with_request_timeout(Duration::from_millis(250))
            .with_reentry_detection(false);

        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(250)));
        assert!(!config.detect_reentry);
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let config = BridgeConfig::new().with_request_timeout(Duration::MAX);
        assert_eq!(config.request_timeout_ms, Some(u64::MAX));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let invalid = BridgeConfig::new().with_error_report_capacity(0);
        assert!(invalid.validate().is_err());

        let zero_timeout = BridgeConfig {
            request_timeout_ms: Some(0),
            ..BridgeConfig::default()
        };
        assert!(zero_timeout.validate().is_err());

        assert!(BridgeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = BridgeConfig::from_json_str(r#"{"requestTimeoutMs": 1500}"#).unwrap();
        assert_eq!(config.request_timeout_ms, Some(1500));
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(config.detect_reentry);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"queueCapacity": 4, "debug": true}}"#).unwrap();

        let config = BridgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.queue_capacity, 4);
        assert!(config.debug);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"errorReportCapacity": 0}}"#).unwrap();
        assert!(matches!(
            BridgeConfig::from_file(file.path()),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
