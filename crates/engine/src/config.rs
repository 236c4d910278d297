//! Engine configuration
//!
//! Loaded from a TOML file; every field has a default so an empty file (or no
//! file at all) yields a working in-memory setup.
//!
//! ```toml
//! data_dir = "/var/lib/indexsync"
//! batch_size = 350
//!
//! [retry]
//! max_attempts = 5
//!
//! [backend]
//! kind = "elasticsearch"
//! url = "http://localhost:9200"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("cannot read config {path}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`SyncConfig`]
    #[error("invalid config: {0}")]
    Parse(String),

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was refused
        reason: String,
    },
}

impl From<ConfigError> for indexsync_core::SyncError {
    fn from(e: ConfigError) -> Self {
        indexsync_core::SyncError::Config(e.to_string())
    }
}

/// Which search backend to talk to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process index, lost on exit
    #[default]
    Memory,
    /// Elasticsearch-compatible HTTP endpoint
    Elasticsearch,
}

/// Search backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend implementation
    pub kind: BackendKind,
    /// Base URL of the HTTP backend
    pub url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            kind: BackendKind::Memory,
            url: "http://localhost:9200".to_string(),
            timeout_secs: 30,
        }
    }
}

impl BackendConfig {
    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Backoff applied to transient backend failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per chunk, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff_ms: u64,
    /// Upper bound on any delay
    pub max_backoff_ms: u64,
    /// Growth factor between attempts
    pub multiplier: f64,
    /// Randomize delays to avoid synchronized retries
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Settings of the built-in mappers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Post kinds the post index accepts
    pub post_types: Vec<String>,
    /// Post statuses the post index accepts
    pub post_statuses: Vec<String>,
}

impl Default for MapperConfig {
    fn default() -> Self {
        MapperConfig {
            post_types: vec!["post".to_string(), "page".to_string()],
            post_statuses: vec!["publish".to_string()],
        }
    }
}

/// Default heartbeat age after which a run lock counts as abandoned.
///
/// A live worker heart-beats once per batch, and a batch gives up after the
/// retry schedule is exhausted, so this sits far above any batch's duration.
pub const DEFAULT_STALE_LOCK_AFTER_SECS: u64 = 600;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory of the durable state store
    pub data_dir: PathBuf,
    /// Directory of the JSONL content store
    pub content_dir: PathBuf,
    /// Prefix of physical index names
    pub index_prefix: String,
    /// Records pulled per batch
    pub batch_size: usize,
    /// Documents per backend request
    pub max_bulk_documents: usize,
    /// Pause between batches, in milliseconds
    pub throttle_ms: u64,
    /// Failures kept in a checkpoint's error summary
    pub max_error_summary: usize,
    /// Heartbeat age after which a running lock may be taken over or
    /// cancelled outright; `0` disables takeover
    pub stale_lock_after_secs: Option<u64>,
    /// Backoff policy
    pub retry: RetryConfig,
    /// Search backend
    pub backend: BackendConfig,
    /// Built-in mapper settings
    pub mappers: MapperConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            data_dir: PathBuf::from(".indexsync"),
            content_dir: PathBuf::from("content"),
            index_prefix: "indexsync".to_string(),
            batch_size: 350,
            max_bulk_documents: 500,
            throttle_ms: 0,
            max_error_summary: 50,
            stale_lock_after_secs: Some(DEFAULT_STALE_LOCK_AFTER_SECS),
            retry: RetryConfig::default(),
            backend: BackendConfig::default(),
            mappers: MapperConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be greater than zero"));
        }
        if self.max_bulk_documents == 0 {
            return Err(invalid("max_bulk_documents", "must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if !(self.retry.multiplier >= 1.0) {
            return Err(invalid("retry.multiplier", "must be at least 1.0"));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(invalid(
                "retry.initial_backoff_ms",
                "must not exceed retry.max_backoff_ms",
            ));
        }
        if self.index_prefix.is_empty()
            || !self
                .index_prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(invalid(
                "index_prefix",
                "must be non-empty lowercase letters, digits, '-' or '_'",
            ));
        }
        if self.backend.kind == BackendKind::Elasticsearch && self.backend.url.is_empty() {
            return Err(invalid("backend.url", "required for the elasticsearch backend"));
        }
        Ok(())
    }

    /// Stale lock threshold, `None` when takeover is disabled
    pub fn stale_lock_after(&self) -> Option<chrono::Duration> {
        self.stale_lock_after_secs
            .filter(|secs| *secs > 0)
            .map(|secs| chrono::Duration::seconds(secs.min(i64::MAX as u64) as i64))
    }

    /// Pause between batches
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
