//! Search backends
//!
//! A backend stores documents under physical index names. Documents are keyed
//! by id, so indexing the same id twice replaces the document instead of
//! duplicating it; this is what makes re-flushing a batch after a crash safe.

mod elasticsearch;
mod memory;

pub use elasticsearch::ElasticsearchBackend;
pub use memory::MemoryBackend;

use crate::config::{BackendConfig, BackendKind};
use indexsync_core::{DocumentOutcome, IndexDocument, SyncError, TenantId};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Backend failures affecting a whole request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Timeouts, throttling, temporary unavailability; worth retrying
    #[error("transient backend error: {0}")]
    Transient(String),

    /// Anything a retry will not fix
    #[error("backend error: {0}")]
    Fatal(String),
}

impl BackendError {
    /// Check if the request may succeed when retried
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

impl From<BackendError> for SyncError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Transient(msg) => SyncError::BackendTransient(msg),
            BackendError::Fatal(msg) => SyncError::Backend(msg),
        }
    }
}

/// A search index service
pub trait SearchBackend: Send + Sync {
    /// Index documents; returns one outcome per document, in order
    fn bulk_index(&self, index: &str, documents: &[IndexDocument]) -> Result<Vec<DocumentOutcome>, BackendError>;

    /// Create an index with the given mapping
    fn create_index(&self, index: &str, mapping: &Value) -> Result<(), BackendError>;

    /// Delete an index; deleting a missing index is not an error
    fn delete_index(&self, index: &str) -> Result<(), BackendError>;

    /// Documents in an index, `None` if the index does not exist
    fn document_count(&self, index: &str) -> Result<Option<u64>, BackendError>;
}

/// Backend described by the configuration
pub fn from_config(config: &BackendConfig) -> Arc<dyn SearchBackend> {
    match config.kind {
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::Elasticsearch => Arc::new(ElasticsearchBackend::new(config.url.clone(), config.timeout())),
    }
}

/// Physical index name of a logical index for one tenant
///
/// `<prefix>-<index>-<tenant>`, lowercased: search backends refuse
/// uppercase index names.
pub fn physical_index_name(prefix: &str, tenant: &TenantId, index_name: &str) -> String {
    format!("{}-{}-{}", prefix, index_name, tenant).to_lowercase()
}
