//! Device service configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use devicelink_common::LoggingConfig;

use crate::connection::{
    ConnectionInfo, ConnectionInfoError, ProtocolProperties, create_connection_info,
};
use crate::transport::TransportOptions;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] devicelink_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid connection for device: {0}")]
    Connection(#[from] ConnectionInfoError),
}

/// Complete device service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceServiceConfig {
    /// The device to talk to
    pub device: DeviceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for a single Modbus device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name (used in logs and CLI output)
    pub name: String,

    /// Protocol properties keyed by protocol name ("modbus-tcp", "modbus-rtu", "modbus-ascii")
    pub protocols: HashMap<String, ProtocolProperties>,

    /// Connect and request timeout in milliseconds (0 = wait forever)
    #[serde(default)]
    pub timeout_ms: u64,
}

impl DeviceServiceConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: DeviceServiceConfig = devicelink_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn from_json5(content: &str) -> Result<Self, ConfigError> {
        let config: DeviceServiceConfig = devicelink_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.name.is_empty() {
            return Err(ConfigError::Validation(
                "Device name cannot be empty".to_string(),
            ));
        }

        if self.device.protocols.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Device '{}': at least one protocol must be configured",
                self.device.name
            )));
        }

        self.device.connection_info()?;
        Ok(())
    }
}

impl DeviceConfig {
    /// Build the validated connection parameters for this device.
    pub fn connection_info(&self) -> Result<ConnectionInfo, ConnectionInfoError> {
        create_connection_info(&self.protocols)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions::from_millis(self.timeout_ms)
    }
}
