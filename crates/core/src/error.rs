//! Error types for synchronization runs
//!
//! ## Propagation Policy
//!
//! | Error | Scope | Effect on the run |
//! |-------|-------|-------------------|
//! | Busy | trigger | Request refused, existing run untouched |
//! | InvalidTransition | trigger | Request refused |
//! | RecordMapping | record | Counted, loop continues |
//! | BackendRejection | document | Counted, loop continues |
//! | BackendTransient | batch | Retried; exhausted retries are counted |
//! | CheckpointPersistence | run | Fatal: run fails, lock released |
//! | ContentSource | run | Fatal: run fails, lock released |
//!
//! Only lock-acquisition and storage failures ever stop a run.

use crate::run_types::{LockStatus, BUSY_MESSAGE};
use crate::types::{RecordId, TenantId, TriggerSource};
use thiserror::Error;

/// Errors raised by the sync engine
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another run owns the tenant's lock
    #[error("{message}")]
    Busy {
        /// Tenant whose lock is held
        tenant: TenantId,
        /// Trigger source owning the lock
        owner: Option<TriggerSource>,
        /// Human-facing message
        message: String,
    },

    /// The requested transition is not allowed from the current status
    #[error("cannot {action} sync for tenant {tenant}: status is {status}")]
    InvalidTransition {
        /// Tenant addressed
        tenant: TenantId,
        /// Requested action
        action: &'static str,
        /// Status the lock was in
        status: LockStatus,
    },

    /// One record could not be mapped
    #[error("record {record_id} failed to map into {index_name}: {reason}")]
    RecordMapping {
        /// Record id
        record_id: RecordId,
        /// Target index
        index_name: String,
        /// Reason
        reason: String,
    },

    /// Retryable backend failure (timeouts, throttling, unavailable)
    #[error("transient backend error: {0}")]
    BackendTransient(String),

    /// The backend refused a document
    #[error("document {id} rejected: {reason}")]
    BackendRejection {
        /// Document id
        id: RecordId,
        /// Reason reported by the backend
        reason: String,
    },

    /// Non-retryable backend failure outside of document indexing
    #[error("backend error: {0}")]
    Backend(String),

    /// Checkpoint could not be persisted
    #[error("checkpoint persistence failed: {0}")]
    CheckpointPersistence(String),

    /// The content store could not be read
    #[error("content source error: {0}")]
    ContentSource(String),

    /// State store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Compare-and-swap lost against a concurrent writer
    #[error("conflict: {0}")]
    Conflict(String),

    /// Invalid configuration or request
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bug or invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Busy rejection for a tenant whose lock is held
    pub fn busy(tenant: TenantId, owner: Option<TriggerSource>) -> Self {
        let message = match owner {
            Some(owner) => format!("{} (started from {}, tenant {})", BUSY_MESSAGE, owner, tenant),
            None => format!("{} (tenant {})", BUSY_MESSAGE, tenant),
        };
        SyncError::Busy {
            tenant,
            owner,
            message,
        }
    }

    /// Check if this is a busy rejection
    pub fn is_busy(&self) -> bool {
        matches!(self, SyncError::Busy { .. })
    }

    /// Check if the operation may succeed when retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::BackendTransient(_) | SyncError::Conflict(_) | SyncError::Busy { .. }
        )
    }

    /// Check if this error stops a run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::CheckpointPersistence(_)
                | SyncError::ContentSource(_)
                | SyncError::Storage(_)
                | SyncError::Io(_)
                | SyncError::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}
