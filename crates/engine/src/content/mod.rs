//! Content stores the sync engine reads from
//!
//! A store holds, per tenant, named collections of records keyed by strictly
//! increasing ids. The engine only ever reads a collection forward through
//! `fetch_after`, so records inserted or deleted between two calls never
//! make a cursor skip or repeat an id.

mod jsonl;
mod memory;

pub use jsonl::JsonlContentStore;
pub use memory::MemoryContentStore;

use indexsync_core::{ContentRecord, RecordId, SyncError, TenantId};
use thiserror::Error;

/// Content store failures
#[derive(Debug, Error)]
pub enum ContentError {
    /// Reading the backing storage failed
    #[error("I/O error reading {collection} of tenant {tenant}: {source}")]
    Io {
        /// Tenant read
        tenant: TenantId,
        /// Collection read
        collection: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// The store itself is unusable
    #[error("content store unavailable: {0}")]
    Unavailable(String),
}

impl From<ContentError> for SyncError {
    fn from(e: ContentError) -> Self {
        SyncError::ContentSource(e.to_string())
    }
}

/// Source of the records a run indexes
pub trait ContentStore: Send + Sync {
    /// Up to `limit` records of a collection with id greater than `after`,
    /// ordered by ascending id
    fn fetch_after(
        &self,
        tenant: &TenantId,
        collection: &str,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<ContentRecord>, ContentError>;

    /// Number of records in a collection
    fn count(&self, tenant: &TenantId, collection: &str) -> Result<u64, ContentError>;

    /// Entries of a collection that could not be read as records
    fn malformed(&self, _tenant: &TenantId, _collection: &str) -> Result<u64, ContentError> {
        Ok(0)
    }

    /// Tenants that have content, in ascending order
    fn tenants(&self) -> Result<Vec<TenantId>, ContentError>;
}
