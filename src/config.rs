//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{GroundStationError, Result};
use crate::frame::protocol::TELEMETRY_FIELD_COUNT;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub durable_log: DurableLogConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Link (serial port) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_expected_field_count")]
    pub expected_field_count: usize,
}

/// Raw frame log configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DurableLogConfig {
    #[serde(default = "default_data_dir")]
    pub dir: String,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// fsync after every frame; when false, frames are only flushed to the OS
    #[serde(default = "default_sync_each_write")]
    pub sync_each_write: bool,
}

/// Parsed record export configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_export_dir")]
    pub dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

/// Console consumer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ConsumerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Diagnostic log file configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,

    #[serde(default = "default_log_file_name")]
    pub file_name: String,
}

// Default value functions
fn default_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 9600 }
fn default_read_timeout_ms() -> u64 { 5000 }
fn default_reconnect_interval_ms() -> u64 { 250 }
fn default_expected_field_count() -> usize { TELEMETRY_FIELD_COUNT }

fn default_data_dir() -> String { "./data".to_string() }
fn default_file_prefix() -> String { "data".to_string() }
fn default_sync_each_write() -> bool { true }

fn default_export_dir() -> String { "./data/records".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }

fn default_poll_interval_ms() -> u64 { 1000 }

fn default_log_dir() -> String { "./logs".to_string() }
fn default_log_file_name() -> String { "ground-station.log".to_string() }

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            expected_field_count: default_expected_field_count(),
        }
    }
}

impl Default for DurableLogConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
            file_prefix: default_file_prefix(),
            sync_each_write: default_sync_each_write(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_export_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            file_name: default_log_file_name(),
        }
    }
}

/// Baud rates the base station radio can be configured for
const SUPPORTED_BAUD_RATES: [u32; 8] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

fn invalid(message: impl std::fmt::Display) -> GroundStationError {
    GroundStationError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cansat_ground_station::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.link.port.is_empty() {
            return Err(invalid("link port cannot be empty"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.link.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {:?}",
                SUPPORTED_BAUD_RATES
            )));
        }

        if self.link.read_timeout_ms == 0 || self.link.read_timeout_ms > 60000 {
            return Err(invalid("read_timeout_ms must be between 1 and 60000"));
        }

        if self.link.reconnect_interval_ms == 0 || self.link.reconnect_interval_ms > 60000 {
            return Err(invalid("reconnect_interval_ms must be between 1 and 60000"));
        }

        // The record schema is fixed; the setting exists to catch firmware mismatches early
        if self.link.expected_field_count != TELEMETRY_FIELD_COUNT {
            return Err(invalid(format!(
                "expected_field_count must be {} (fields: latitude..snr)",
                TELEMETRY_FIELD_COUNT
            )));
        }

        if self.durable_log.dir.is_empty() {
            return Err(invalid("durable_log dir cannot be empty"));
        }

        if self.durable_log.file_prefix.is_empty()
            || self.durable_log.file_prefix.contains(['/', '\\'])
        {
            return Err(invalid("durable_log file_prefix must be a non-empty file name"));
        }

        if self.export.enabled {
            if self.export.dir.is_empty() {
                return Err(invalid("export dir cannot be empty when enabled"));
            }

            if self.export.max_records_per_file == 0 {
                return Err(invalid("max_records_per_file must be greater than 0"));
            }

            if self.export.max_files_to_keep == 0 {
                return Err(invalid("max_files_to_keep must be greater than 0"));
            }
        }

        if self.consumer.poll_interval_ms == 0 || self.consumer.poll_interval_ms > 60000 {
            return Err(invalid("poll_interval_ms must be between 1 and 60000"));
        }

        if self.logging.dir.is_empty() || self.logging.file_name.is_empty() {
            return Err(invalid("logging dir and file_name cannot be empty"));
        }

        Ok(())
    }
}
