//! Unified error type for indexsync.
//!
//! Wraps the errors of the storage layer and the engine and presents one
//! interface to trigger front ends. The variant set mirrors the error
//! categories every front end has to tell apart: a busy tenant is reported
//! to the user, a transient backend failure may be retried, everything else
//! is fatal for the request.

use indexsync_core::SyncError;
use indexsync_engine::ConfigError;
use indexsync_storage::StorageError;
use thiserror::Error;

/// All indexsync errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A run already holds the tenant's lock
    #[error("{0}")]
    Busy(String),

    /// The requested control action does not apply to the current status
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Configuration is missing or out of range
    #[error("configuration error: {0}")]
    Config(String),

    /// The search backend failed, worth retrying
    #[error("transient backend error: {0}")]
    BackendTransient(String),

    /// The search backend failed
    #[error("backend error: {0}")]
    Backend(String),

    /// Content could not be read
    #[error("content source error: {0}")]
    ContentSource(String),

    /// Run state could not be read or written
    #[error("storage error: {0}")]
    Storage(String),

    /// Version conflict (CAS failure)
    #[error("conflict: {0}")]
    Conflict(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (bug or invariant violation)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for indexsync operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if another run holds the lock.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy(_))
    }

    /// Check if this error is retryable.
    ///
    /// Conflicts and transient backend failures may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::BackendTransient(_))
    }

    /// Check if this is a serious/unrecoverable error.
    pub fn is_serious(&self) -> bool {
        matches!(self, Error::Internal(_) | Error::Storage(_))
    }
}

impl From<SyncError> for Error {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Busy { message, .. } => Error::Busy(message),
            e @ SyncError::InvalidTransition { .. } => Error::InvalidTransition(e.to_string()),
            e @ SyncError::RecordMapping { .. } => Error::Internal(e.to_string()),
            SyncError::BackendTransient(msg) => Error::BackendTransient(msg),
            e @ SyncError::BackendRejection { .. } => Error::Backend(e.to_string()),
            SyncError::Backend(msg) => Error::Backend(msg),
            SyncError::CheckpointPersistence(msg) => Error::Storage(format!("checkpoint: {}", msg)),
            SyncError::ContentSource(msg) => Error::ContentSource(msg),
            SyncError::Storage(msg) => Error::Storage(msg),
            SyncError::Conflict(msg) => Error::Conflict(msg),
            SyncError::Config(msg) => Error::Config(msg),
            SyncError::Serialization(msg) => Error::Serialization(msg),
            SyncError::Io(e) => Error::Io(e),
            SyncError::Internal(msg) => Error::Internal(msg),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        match e {
            e @ StorageError::Conflict { .. } => Error::Conflict(e.to_string()),
            StorageError::Io(e) => Error::Io(e),
            StorageError::Serialization(msg) => Error::Serialization(msg),
            e => Error::Storage(e.to_string()),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
