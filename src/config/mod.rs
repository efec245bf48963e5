//! Configuration management for assay-export
//!
//! Configuration is read from a TOML file and then overridden by
//! command-line arguments. Precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Configuration file
//! 3. Default values
//!
//! ```toml
//! [export]
//! output_dir = "assay-exports"
//! page_size = 5000
//!
//! [source]
//! uri = "mongodb://localhost:27017"
//! database = "qc"
//! collection = "qc_reports"
//!
//! [[destinations]]
//! key = "Endotoxin"
//! filename = "endotoxin.csv"
//! columns = ["spikeRecovery", "endotoxin"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::export::coordinator::ExportOptions;
use crate::export::destination::{Destination, DestinationRegistry};
use crate::export::writer::WriterOptions;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Export run configuration
    #[serde(default)]
    pub export: ExportConfig,

    /// Record source configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Destinations; the built-in QC assays when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destinations: Vec<Destination>,
}

/// Export run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory receiving the CSV files (created if absent)
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Records requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Records between progress notifications
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Buffered bytes per file before the writer must drain
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,

    /// Start every file with a UTF-8 byte-order mark
    #[serde(default = "default_byte_order_mark")]
    pub byte_order_mark: bool,

    /// Publish partial output when the run fails
    #[serde(default = "default_commit_on_failure")]
    pub commit_on_failure: bool,

    /// Show a progress spinner
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

/// Record source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// MongoDB connection URI
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Database holding the QC reports
    #[serde(default = "default_database")]
    pub database: String,

    /// Collection with one document per QC report
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Integer primary key field
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Field exported as `fbId`
    #[serde(default = "default_foreign_key_field")]
    pub foreign_key_field: String,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
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
fn default_output_dir() -> PathBuf {
    PathBuf::from("assay-exports")
}

fn default_page_size() -> u32 {
    5000
}

fn default_progress_interval() -> u64 {
    25_000
}

fn default_high_water_mark() -> usize {
    crate::export::writer::DEFAULT_HIGH_WATER_MARK
}

fn default_byte_order_mark() -> bool {
    true
}

fn default_commit_on_failure() -> bool {
    true
}

fn default_show_progress() -> bool {
    true
}

fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_database() -> String {
    "qc".to_string()
}

fn default_collection() -> String {
    "qc_reports".to_string()
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_foreign_key_field() -> String {
    "formulationBatchId".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            page_size: default_page_size(),
            progress_interval: default_progress_interval(),
            high_water_mark: default_high_water_mark(),
            byte_order_mark: default_byte_order_mark(),
            commit_on_failure: default_commit_on_failure(),
            show_progress: default_show_progress(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            database: default_database(),
            collection: default_collection(),
            id_field: default_id_field(),
            foreign_key_field: default_foreign_key_field(),
            timeout: default_timeout(),
        }
    }
}

impl SourceConfig {
    /// Connection and server selection timeout
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
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

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::FileNotFound(format!("{}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::from)?;
        Ok(config)
    }

    /// Load configuration from an explicit path or the default location
    ///
    /// An explicit path must exist. The default path is optional; defaults
    /// are used when it is absent.
    pub fn load_from_file(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Get the default configuration file path
    ///
    /// # Returns
    /// * `PathBuf` - Path to default configuration file
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".assay-export")
            .join("config.toml")
    }

    /// Serialize the effective configuration
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Validate the configuration
    ///
    /// # Returns
    /// * `Result<()>` - Ok if valid, error otherwise
    pub fn validate(&self) -> Result<()> {
        if self.export.page_size == 0 {
            return Err(invalid("export.page_size", "0"));
        }
        if self.export.progress_interval == 0 {
            return Err(invalid("export.progress_interval", "0"));
        }
        if self.export.high_water_mark == 0 {
            return Err(invalid("export.high_water_mark", "0"));
        }
        if self.export.output_dir.as_os_str().is_empty() {
            return Err(invalid("export.output_dir", ""));
        }
        if self.source.uri.trim().is_empty() {
            return Err(invalid("source.uri", &self.source.uri));
        }
        if self.source.collection.trim().is_empty() {
            return Err(invalid("source.collection", &self.source.collection));
        }
        if self.source.id_field == self.source.foreign_key_field {
            return Err(invalid("source.foreign_key_field", &self.source.foreign_key_field));
        }
        self.registry()?;
        Ok(())
    }

    /// Destination registry described by this configuration
    pub fn registry(&self) -> Result<DestinationRegistry> {
        if self.destinations.is_empty() {
            Ok(DestinationRegistry::qc_assays())
        } else {
            Ok(DestinationRegistry::new(self.destinations.clone())?)
        }
    }

    /// Run options for the export coordinator
    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            output_dir: self.export.output_dir.clone(),
            page_size: self.export.page_size,
            progress_interval: self.export.progress_interval,
            writer: WriterOptions {
                high_water_mark: self.export.high_water_mark,
                byte_order_mark: self.export.byte_order_mark,
            },
            commit_on_failure: self.export.commit_on_failure,
        }
    }
}

fn invalid(field: &str, value: &str) -> crate::error::ExportError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
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
