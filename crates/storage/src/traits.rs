//! The state store abstraction
//!
//! Run locks, checkpoints and feature flags live in a small key-value store
//! partitioned by tenant. Every mutation goes through
//! [`StateStore::compare_and_swap`], which is the single mutual-exclusion
//! point between trigger sources.
//!
//! ## Version Rules
//!
//! - A created record gets a version no earlier record of the same key had
//! - Each successful CAS assigns a new, strictly greater version
//! - Versions are never reused for a key, not even after a delete
//!
//! The last rule matters for long-lived workers: a worker holding version
//! `v` of a checkpoint that was deleted and recreated must not be able to
//! overwrite the new record by accident.

use crate::error::StorageResult;
use indexsync_core::{TenantId, Version};

/// A stored value and its version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    /// Raw value bytes
    pub value: Vec<u8>,
    /// Version of the record
    pub version: Version,
}

/// Versioned key-value store with atomic compare-and-swap
///
/// Implementations must be safe to share between threads. Implementations
/// backed by shared storage must make `compare_and_swap` atomic across
/// processes as well.
pub trait StateStore: Send + Sync {
    /// Read a record
    fn get(&self, tenant: &TenantId, key: &str) -> StorageResult<Option<Versioned>>;

    /// Atomically replace a record if its version matches
    ///
    /// # Arguments
    ///
    /// * `expected` - Version the caller read, `None` if it read no record
    /// * `value` - New value, `None` to delete the record
    ///
    /// # Returns
    ///
    /// The new version, or `None` when the record was deleted.
    /// `StorageError::Conflict` if the stored version differs from `expected`.
    fn compare_and_swap(
        &self,
        tenant: &TenantId,
        key: &str,
        expected: Option<Version>,
        value: Option<Vec<u8>>,
    ) -> StorageResult<Option<Version>>;

    /// Tenants that have at least one live record, sorted
    fn tenants(&self) -> StorageResult<Vec<TenantId>>;
}
