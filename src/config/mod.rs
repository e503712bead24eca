//! Configuration management for rds-export
//!
//! This module handles loading, parsing, and managing configuration from various sources:
//! - Configuration files (TOML format)
//! - Environment variables
//! - Command-line arguments
//!
//! Configuration precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file
//! 4. Default values

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::ConnectionParams;
use crate::error::{ConfigError, ExportError, Result};
use crate::export::convert::KeyNaming;
use crate::export::postgres::RowCountMode;
use crate::export::sink::{MIN_PART_BYTES, SinkSettings};
use crate::query::request::DEFAULT_BATCH_SIZE;

/// Environment variable naming the destination bucket
pub const ENV_BUCKET_NAME: &str = "BUCKET_NAME";

/// Environment variable holding the object key prefix
pub const ENV_KEY_PREFIX: &str = "S3_KEY_PREFIX";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database connection
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Export pipeline tuning
    #[serde(default)]
    pub export: ExportConfig,

    /// Output storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_sslmode")]
    pub sslmode: String,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

/// Export pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Rows fetched per cursor round trip
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Average serialized size of one column value, for size estimates
    #[serde(default = "default_avg_bytes_per_value")]
    pub avg_bytes_per_value: u64,

    /// Estimated size at which multipart upload is used
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: u64,

    /// Target size of each multipart part
    #[serde(default = "default_part_size")]
    pub part_size_bytes: u64,

    /// How the projected row count is obtained
    #[serde(default)]
    pub row_count: RowCountMode,

    /// Write external field names instead of storage column names
    #[serde(default)]
    pub external_field_names: bool,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    S3,
    Filesystem,
}

/// Output storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Destination bucket
    #[serde(default)]
    pub bucket: String,

    /// Prepended to every object key
    #[serde(default)]
    pub key_prefix: String,

    #[serde(default)]
    pub region: Option<String>,

    /// Custom S3 endpoint (e.g. a local emulator)
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Root directory of the filesystem backend
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "postgres".to_string()
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_sslmode() -> String {
    "prefer".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_avg_bytes_per_value() -> u64 {
    70
}

fn default_multipart_threshold() -> u64 {
    50 * 1024 * 1024
}

fn default_part_size() -> u64 {
    20 * 1024 * 1024
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("./exports")
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            user: default_user(),
            password: String::new(),
            sslmode: default_sslmode(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            avg_bytes_per_value: default_avg_bytes_per_value(),
            multipart_threshold_bytes: default_multipart_threshold(),
            part_size_bytes: default_part_size(),
            row_count: RowCountMode::default(),
            external_field_names: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            bucket: String::new(),
            key_prefix: String::new(),
            region: None,
            endpoint_url: None,
            root_dir: default_root_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

fn invalid(field: &str, value: impl ToString) -> ExportError {
    ExportError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ExportError::Config(ConfigError::FileNotFound(path.display().to_string()))
            }
            _ => ExportError::Io(e),
        })?;
        toml::from_str(&text)
            .map_err(|e| ExportError::Config(ConfigError::InvalidFormat(e.to_string())))
    }

    /// Load configuration with file and environment precedence
    ///
    /// An explicit path must exist; the default path is optional.
    ///
    /// # Arguments
    /// * `path` - Config file given on the command line, if any
    ///
    /// # Returns
    /// * `Result<Config>` - Merged configuration or error
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Apply environment overrides
    ///
    /// # Arguments
    /// * `lookup` - Reads a variable by name
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bucket) = lookup(ENV_BUCKET_NAME).filter(|v| !v.is_empty()) {
            self.storage.bucket = bucket;
        }
        if let Some(prefix) = lookup(ENV_KEY_PREFIX) {
            self.storage.key_prefix = prefix;
        }
    }

    /// Get the default configuration file path
    ///
    /// # Returns
    /// * `PathBuf` - Path to default configuration file
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".rds-export")
            .join("config.toml")
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ExportError::Config(ConfigError::InvalidFormat(e.to_string())))
    }

    /// Validate the configuration
    ///
    /// # Returns
    /// * `Result<()>` - Ok if valid, error otherwise
    pub fn validate(&self) -> Result<()> {
        if self.export.batch_size == 0 {
            return Err(invalid("export.batch_size", self.export.batch_size));
        }
        if self.export.avg_bytes_per_value == 0 {
            return Err(invalid(
                "export.avg_bytes_per_value",
                self.export.avg_bytes_per_value,
            ));
        }
        if self.export.part_size_bytes < MIN_PART_BYTES {
            return Err(invalid("export.part_size_bytes", self.export.part_size_bytes));
        }
        if self.storage.backend == StorageBackend::S3 && self.storage.bucket.trim().is_empty() {
            return Err(ExportError::Config(ConfigError::MissingField(
                "storage.bucket".to_string(),
            )));
        }
        Ok(())
    }

    /// Get connection timeout as Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connect_timeout)
    }

    /// Sink sizing derived from the export section
    pub fn sink_settings(&self) -> SinkSettings {
        SinkSettings {
            avg_bytes_per_value: self.export.avg_bytes_per_value,
            multipart_threshold_bytes: self.export.multipart_threshold_bytes,
            part_size_bytes: self.export.part_size_bytes,
            min_part_bytes: MIN_PART_BYTES,
        }
    }

    /// Output key naming
    pub fn key_naming(&self) -> KeyNaming {
        KeyNaming::from_flag(self.export.external_field_names)
    }
}

impl DatabaseConfig {
    /// Connection record for this section
    pub fn to_params(&self) -> ConnectionParams {
        ConnectionParams {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            sslmode: self.sslmode.clone(),
        }
    }
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}
