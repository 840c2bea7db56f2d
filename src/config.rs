//! Configuration types for Hulk
//!
//! Values are resolved with the precedence: explicit setter or CLI flag,
//! then environment, then config file, then built-in default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fingerprint::FingerprintDigest;
use crate::storage::validate_name;
use crate::{HulkError, Result};

/// Environment variable overriding the storage base directory
pub const ENV_BASE_DIR: &str = "HULK_DATASET_BASE_DIR";
/// Environment variable overriding the default dataset
pub const ENV_DATASET: &str = "HULK_DATASET";
/// Environment variable overriding the active dataset pointer file
pub const ENV_POINTER_FILE: &str = "HULK_POINTER_FILE";
/// Environment variable enabling recording
pub const ENV_RECORDING: &str = "HULK_RECORDING";

/// Name of the dataset used when nothing else is selected
pub const DEFAULT_DATASET: &str = "default";
/// File name of the active dataset pointer
pub const POINTER_FILE_NAME: &str = "current_dataset.hulk";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding one sub-directory per dataset
    pub base_dir: PathBuf,
    /// Dataset used when the pointer is unset
    pub default_dataset: String,
    /// Shared file holding the active dataset name
    pub pointer_file: PathBuf,
    /// Fetch and store missing fixtures from the origin
    pub recording: bool,
    /// Digest used to name fixture files
    pub digest: FingerprintDigest,
    /// Bound on one origin fetch during RECORD
    pub origin_timeout_ms: u64,
    /// Bound on waiting for an advisory file lock
    pub lock_timeout_ms: u64,
    /// Address the proxy server listens on
    pub listen: String,
    /// Maximum concurrent inbound connections
    pub max_connections: usize,
    /// Maximum inbound request body size in bytes
    pub max_body_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("datasets"),
            default_dataset: DEFAULT_DATASET.to_string(),
            pointer_file: std::env::temp_dir().join(POINTER_FILE_NAME),
            recording: false,
            digest: FingerprintDigest::default(),
            origin_timeout_ms: 30_000,
            lock_timeout_ms: 10_000,
            listen: "127.0.0.1:5000".to_string(),
            max_connections: 256,
            max_body_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// Environment overrides are applied on top of the file.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HulkError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| HulkError::ConfigError(format!("Failed to parse config: {e}")))?;

        let config = config.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from defaults and the process environment
    ///
    /// # Errors
    ///
    /// Returns error if an environment value is invalid
    pub fn from_env() -> Result<Self> {
        let config = Self::default().with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    ///
    /// # Errors
    ///
    /// Returns error if an environment value is invalid
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    ///
    /// # Errors
    ///
    /// Returns error if `HULK_RECORDING` is not a boolean
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_BASE_DIR).filter(|v| !v.is_empty()) {
            self.base_dir = PathBuf::from(dir);
        }
        if let Some(dataset) = lookup(ENV_DATASET).filter(|v| !v.is_empty()) {
            self.default_dataset = dataset;
        }
        if let Some(pointer) = lookup(ENV_POINTER_FILE).filter(|v| !v.is_empty()) {
            self.pointer_file = PathBuf::from(pointer);
        }
        if let Some(flag) = lookup(ENV_RECORDING) {
            self.recording = parse_bool(&flag).ok_or_else(|| {
                HulkError::ConfigError(format!("{ENV_RECORDING}: not a boolean: '{flag}'"))
            })?;
        }
        Ok(self)
    }

    /// Set the default dataset explicitly
    #[must_use]
    pub fn default_dataset(mut self, name: impl Into<String>) -> Self {
        self.default_dataset = name.into();
        self
    }

    /// Set the storage base directory explicitly
    #[must_use]
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Set the pointer file explicitly
    #[must_use]
    pub fn pointer_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pointer_file = path.into();
        self
    }

    /// Enable or disable recording explicitly
    #[must_use]
    pub fn recording(mut self, enabled: bool) -> Self {
        self.recording = enabled;
        self
    }

    /// Origin fetch timeout
    #[must_use]
    pub fn origin_timeout(&self) -> Duration {
        Duration::from_millis(self.origin_timeout_ms)
    }

    /// Lock acquisition timeout
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.default_dataset)
            .map_err(|e| HulkError::ConfigError(format!("default_dataset: {e}")))?;

        if self.base_dir.as_os_str().is_empty() {
            return Err(HulkError::ConfigError(
                "base_dir cannot be empty".to_string(),
            ));
        }

        if self.pointer_file.as_os_str().is_empty() {
            return Err(HulkError::ConfigError(
                "pointer_file cannot be empty".to_string(),
            ));
        }

        if self.origin_timeout_ms == 0 {
            return Err(HulkError::ConfigError(
                "origin_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.lock_timeout_ms == 0 {
            return Err(HulkError::ConfigError(
                "lock_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(HulkError::ConfigError(
                "max_connections must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
