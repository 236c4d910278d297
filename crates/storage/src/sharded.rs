//! In-memory sharded state store
//!
//! # Design
//!
//! - DashMap: one shard per tenant, lock-free reads
//! - FxHashMap: O(1) lookups inside a shard
//! - Per-tenant: different tenants never contend
//!
//! Compare-and-swap holds the tenant's shard entry for the duration of the
//! check and the write, which makes it atomic with respect to every other
//! thread of the process. It offers nothing across processes: use
//! [`FileStore`](crate::FileStore) when trigger sources live in different
//! processes.

use crate::error::{StorageError, StorageResult};
use crate::traits::{StateStore, Versioned};
use dashmap::DashMap;
use indexsync_core::{TenantId, Version};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-tenant shard
#[derive(Debug, Default)]
struct Shard {
    data: FxHashMap<String, Versioned>,
}

/// Sharded in-memory store - DashMap by tenant, FxHashMap within
///
/// Versions come from one store-wide counter, so they are never reused for a
/// key even after the key is deleted and recreated.
///
/// # Example
///
/// ```
/// use indexsync_core::TenantId;
/// use indexsync_storage::{ShardedStore, StateStore};
///
/// let store = ShardedStore::new();
/// let tenant = TenantId::new("1");
/// let v1 = store.compare_and_swap(&tenant, "run_lock", None, Some(b"{}".to_vec())).unwrap();
/// assert!(v1.is_some());
/// assert!(store.compare_and_swap(&tenant, "run_lock", None, Some(b"{}".to_vec())).is_err());
/// ```
#[derive(Debug, Default)]
pub struct ShardedStore {
    shards: DashMap<TenantId, Shard>,
    version: AtomicU64,
}

impl ShardedStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get number of shards (tenants)
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Get total number of live records across all shards
    pub fn total_entries(&self) -> usize {
        self.shards.iter().map(|entry| entry.value().data.len()).sum()
    }

    #[inline]
    fn next_version(&self) -> Version {
        Version::new(self.version.fetch_add(1, Ordering::AcqRel) + 1)
    }
}

impl StateStore for ShardedStore {
    fn get(&self, tenant: &TenantId, key: &str) -> StorageResult<Option<Versioned>> {
        Ok(self
            .shards
            .get(tenant)
            .and_then(|shard| shard.data.get(key).cloned()))
    }

    fn compare_and_swap(
        &self,
        tenant: &TenantId,
        key: &str,
        expected: Option<Version>,
        value: Option<Vec<u8>>,
    ) -> StorageResult<Option<Version>> {
        let mut shard = self.shards.entry(tenant.clone()).or_default();

        let actual = shard.data.get(key).map(|v| v.version);
        if actual != expected {
            return Err(StorageError::Conflict {
                key: format!("{}/{}", tenant, key),
                expected,
                actual,
            });
        }

        match value {
            Some(value) => {
                let version = self.next_version();
                shard.data.insert(key.to_string(), Versioned { value, version });
                Ok(Some(version))
            }
            None => {
                shard.data.remove(key);
                Ok(None)
            }
        }
    }

    fn tenants(&self) -> StorageResult<Vec<TenantId>> {
        let mut tenants: Vec<TenantId> = self
            .shards
            .iter()
            .filter(|entry| !entry.value().data.is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        tenants.sort();
        Ok(tenants)
    }
}
