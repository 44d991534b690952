//! Configuration management for the evaporator driver
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. Serial line parameters and register maps
//! are fixed per device and live with the device managers; only the port and
//! response timeout of each line are configurable.

use crate::error::{EvaporatorError, Result};
use crate::logging::parse_log_level;
use crate::messages::Language;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "EVAPORATOR_CONFIG";

/// Default serial port of the power supply
pub const DEFAULT_POWER_SUPPLY_PORT: &str = if cfg!(windows) {
    "COM1"
} else {
    "/dev/ttyUSB0"
};

/// Default serial port of the step motor
pub const DEFAULT_STEP_MOTOR_PORT: &str = if cfg!(windows) {
    "COM2"
} else {
    "/dev/ttyUSB1"
};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Power supply serial line
    pub power_supply: DeviceConfig,

    /// Step motor serial line
    pub step_motor: DeviceConfig,

    /// Open both devices when the service starts
    pub connect_on_startup: bool,

    /// Drive in-memory simulated devices instead of serial hardware
    pub simulate: bool,

    /// Telemetry polling interval in milliseconds (0 disables polling)
    pub telemetry_interval_ms: u64,

    /// Language of operator-facing status messages
    pub language: Language,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Web server binding configuration
    pub web: WebConfig,
}

/// Serial line of one device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial device name (e.g. /dev/ttyUSB0 or COM1)
    pub port: String,

    /// Time to wait for a slave response, in milliseconds
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

fn default_response_timeout_ms() -> u64 {
    1000
}

impl DeviceConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level
    #[serde(default)]
    pub console_level: Option<String>,

    /// Optional file-specific level
    #[serde(default)]
    pub file_level: Option<String>,

    /// Optional level for the web log stream
    #[serde(default)]
    pub web_level: Option<String>,

    /// Path to log file
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Bind address
    pub host: String,

    /// TCP port
    pub port: u16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_POWER_SUPPLY_PORT.to_string(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            web_level: None,
            file: "/tmp/evaporator.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8089,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            power_supply: DeviceConfig::default(),
            step_motor: DeviceConfig {
                port: DEFAULT_STEP_MOTOR_PORT.to_string(),
                ..DeviceConfig::default()
            },
            connect_on_startup: true,
            simulate: false,
            telemetry_interval_ms: 1000,
            language: Language::default(),
            logging: LoggingConfig::default(),
            web: WebConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first location that exists
    pub fn load() -> Result<Self> {
        if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV)
            && !explicit.is_empty()
        {
            return Self::from_file(explicit);
        }

        let default_paths = ["evaporator.yaml", "/etc/evaporator/config.yaml"];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (field, device) in [
            ("power_supply", &self.power_supply),
            ("step_motor", &self.step_motor),
        ] {
            if device.port.trim().is_empty() {
                return Err(EvaporatorError::validation(
                    format!("{field}.port"),
                    "Serial port cannot be empty".to_string(),
                ));
            }
            if device.response_timeout_ms == 0 {
                return Err(EvaporatorError::validation(
                    format!("{field}.response_timeout_ms"),
                    "Must be greater than 0".to_string(),
                ));
            }
        }

        if self.power_supply.port == self.step_motor.port {
            return Err(EvaporatorError::validation(
                "step_motor.port",
                "Devices must use different serial ports",
            ));
        }

        if self.web.port == 0 {
            return Err(EvaporatorError::validation(
                "web.port",
                "Port must be greater than 0",
            ));
        }

        parse_log_level(&self.logging.level)?;
        for level in [
            &self.logging.console_level,
            &self.logging.file_level,
            &self.logging.web_level,
        ]
        .into_iter()
        .flatten()
        {
            parse_log_level(level)?;
        }

        Ok(())
    }
}
