//! Configuration for ledger construction and the inspect tool
//!
//! Supports YAML configuration files with module-based organization

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::Level;

pub use crate::error::ConfigError;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Ledger configuration
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Write the configuration as YAML, creating missing parent directories
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        let yaml = serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        fs::write(path, yaml).map_err(|e| io_error(path, e))
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(&mut self, other: Config) {
        self.ledger.merge(other.ledger);
        self.log.merge(other.log);
    }
}

/// Ledger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Build ledgers that reject every mutation
    #[serde(default)]
    pub read_only: bool,
    /// Run the consistency checker after every mutation
    #[serde(default = "default_verify_consistency")]
    pub verify_consistency: bool,
}

fn default_verify_consistency() -> bool {
    cfg!(debug_assertions)
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            verify_consistency: default_verify_consistency(),
        }
    }
}

impl LedgerConfig {
    fn merge(&mut self, other: Self) {
        self.read_only = other.read_only;
        self.verify_consistency = other.verify_consistency;
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    fn merge(&mut self, other: Self) {
        if !other.level.is_empty() {
            self.level = other.level;
        }
    }

    /// The configured level; an unrecognized name falls back to INFO
    pub fn max_level(&self) -> Level {
        self.level.parse().unwrap_or(Level::INFO)
    }
}

fn io_error(path: &Path, e: std::io::Error) -> ConfigError {
    ConfigError::IoError(format!("{}: {}", path.display(), e))
}
