//! Application configuration module
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then environment variables, then validation.
//!
//! # Environment overrides
//!
//! - `TRAILSYNC_REMOTE_URL` - remote base URL
//! - `TRAILSYNC_API_KEY` - remote API key
//! - `TRAILSYNC_ACCESS_TOKEN` - bearer token for the current session
//! - `TRAILSYNC_DB_PATH` - local database file
//!
//! # Example file
//!
//! ```toml
//! [remote]
//! base_url = "https://example.supabase.co"
//! point_batch_size = 200
//!
//! [sync]
//! max_attempts = 6
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default remote base URL
pub const DEFAULT_REMOTE_URL: &str = "http://127.0.0.1:54321";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub sync: SyncSettings,
    pub connectivity: ConnectivitySettings,
    pub storage: StorageSettings,
    pub recording: RecordingSettings,
}

/// Remote store connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    /// Per-call deadline
    pub call_timeout_secs: u64,
    /// Maximum points per insert call
    pub point_batch_size: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REMOTE_URL.to_string(),
            api_key: None,
            access_token: None,
            call_timeout_secs: 30,
            point_batch_size: 100,
        }
    }
}

/// Sync engine retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Trigger a run on every Online transition
    pub auto_sync: bool,
    /// Retryable failures before a route is marked failed
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    /// Attempts for a single local storage operation
    pub storage_retry_attempts: u32,
    pub storage_retry_pause_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_sync: true,
            max_attempts: 5,
            backoff_base_secs: 30,
            backoff_max_secs: 30 * 60,
            storage_retry_attempts: 3,
            storage_retry_pause_ms: 50,
        }
    }
}

/// Connectivity monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivitySettings {
    pub poll_interval_secs: u64,
    /// Consecutive agreeing samples before a transition
    pub stabilization_samples: u32,
    /// Minimum time a new state must hold before a transition
    pub stabilization_window_ms: u64,
    pub probe_timeout_secs: u64,
    /// State assumed before the first confirmed sample
    pub assume_online: bool,
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            stabilization_samples: 3,
            stabilization_window_ms: 10_000,
            probe_timeout_secs: 5,
            assume_online: true,
        }
    }
}

/// Local storage settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Database file; defaults to the platform data directory
    pub db_path: Option<PathBuf>,
}

/// Capture buffer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Buffered-but-unpersisted samples before the oldest is dropped
    pub buffer_capacity: usize,
    /// Points written per store call
    pub flush_batch_size: usize,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: 512,
            flush_batch_size: 64,
        }
    }
}

impl AppConfig {
    /// Create a new AppConfigBuilder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Load defaults, the optional file and environment overrides, then validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                tracing::debug!("Loaded configuration from {}", path.display());
                Self::from_toml_str(&source)?
            }
            Some(path) => {
                tracing::warn!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("TRAILSYNC_REMOTE_URL") {
            self.remote.base_url = url;
        }
        if let Some(key) = lookup("TRAILSYNC_API_KEY") {
            self.remote.api_key = Some(key);
        }
        if let Some(token) = lookup("TRAILSYNC_ACCESS_TOKEN") {
            self.remote.access_token = Some(token);
        }
        if let Some(path) = lookup("TRAILSYNC_DB_PATH") {
            self.storage.db_path = Some(PathBuf::from(path));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        reqwest::Url::parse(&self.remote.base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", self.remote.base_url, e)))?;
        if self.remote.point_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "remote.point_batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.remote.call_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "remote.call_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.sync.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.sync.backoff_max_secs < self.sync.backoff_base_secs {
            return Err(ConfigError::InvalidValue {
                field: "sync.backoff_max_secs",
                reason: "must not be smaller than sync.backoff_base_secs".to_string(),
            });
        }
        if self.connectivity.stabilization_samples == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connectivity.stabilization_samples",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.recording.buffer_capacity == 0 || self.recording.flush_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "recording",
                reason: "buffer_capacity and flush_batch_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Resolved database path
    pub fn db_path(&self) -> PathBuf {
        self.storage.db_path.clone().unwrap_or_else(|| {
            let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
            path.push("trailsync");
            path.push("routes.db");
            path
        })
    }
}

/// Builder for AppConfig
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    /// Set the remote base URL
    pub fn remote_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.base_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.remote.api_key = Some(key.into());
        self
    }

    pub fn point_batch_size(mut self, size: usize) -> Self {
        self.config.remote.point_batch_size = size;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.sync.max_attempts = attempts;
        self
    }

    pub fn backoff_secs(mut self, base: u64, max: u64) -> Self {
        self.config.sync.backoff_base_secs = base;
        self.config.sync.backoff_max_secs = max;
        self
    }

    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.storage.db_path = Some(path.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
