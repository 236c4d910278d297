//! Storage error types

use indexsync_core::{SyncError, Version};
use thiserror::Error;

/// Errors raised by state stores
#[derive(Debug, Error)]
pub enum StorageError {
    /// Compare-and-swap lost: the record changed since it was read
    #[error("version conflict on {key}: expected {expected:?}, found {actual:?}")]
    Conflict {
        /// Record key (`tenant/key`)
        key: String,
        /// Version the caller expected
        expected: Option<Version>,
        /// Version currently stored
        actual: Option<Version>,
    },

    /// Stored bytes failed validation
    #[error("corrupt record {key}: {reason}")]
    Corruption {
        /// Record key (`tenant/key`)
        key: String,
        /// What failed
        reason: String,
    },

    /// The cross-process lock could not be acquired in time
    #[error("timed out acquiring store lock {0}")]
    LockTimeout(String),

    /// Tenant or key is not usable as a storage name
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Value could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Check if this is a compare-and-swap conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<StorageError> for SyncError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Conflict { .. } => SyncError::Conflict(e.to_string()),
            StorageError::Io(io) => SyncError::Io(io),
            StorageError::Serialization(msg) => SyncError::Serialization(msg),
            other => SyncError::Storage(other.to_string()),
        }
    }
}
