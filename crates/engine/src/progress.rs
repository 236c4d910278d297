//! Progress snapshots
//!
//! Workers publish a snapshot after every checkpoint write. Readers get:
//! - The published snapshot when it belongs to the run the lock names,
//!   with status and trigger taken from the lock (a pause is visible as
//!   soon as it is acknowledged, before the worker reaches its boundary)
//! - Otherwise a snapshot derived from the stored lock and checkpoint, which
//!   is how a process that is not running the worker sees progress
//!
//! Reads never wait on a worker: the snapshot map is a [`DashMap`] and the
//! stored state is read without taking any store lock.

use crate::checkpoint::CheckpointStore;
use crate::lock::RunLockTable;
use dashmap::DashMap;
use indexsync_core::{ProgressSnapshot, Result, SyncStatus, TenantId};

/// Snapshot publisher and reader
pub struct ProgressReporter {
    published: DashMap<TenantId, ProgressSnapshot>,
    locks: RunLockTable,
    checkpoints: CheckpointStore,
}

impl ProgressReporter {
    /// Create a reporter over the stored run state
    pub fn new(locks: RunLockTable, checkpoints: CheckpointStore) -> Self {
        ProgressReporter {
            published: DashMap::new(),
            locks,
            checkpoints,
        }
    }

    /// Publish a snapshot, replacing the previous one
    pub fn publish(&self, snapshot: ProgressSnapshot) {
        self.published.insert(snapshot.tenant.clone(), snapshot);
    }

    /// Forget the published snapshot of a tenant
    pub fn forget(&self, tenant: &TenantId) {
        self.published.remove(tenant);
    }

    /// Current progress of a tenant
    pub fn snapshot(&self, tenant: &TenantId) -> Result<ProgressSnapshot> {
        let lock = self.locks.read(tenant)?;
        let published = self
            .published
            .get(tenant)
            .filter(|s| s.run_id.is_some() && s.run_id == lock.run_id)
            .map(|s| s.value().clone());

        if lock.is_held() {
            if let Some(mut snapshot) = published {
                snapshot.status = lock.status.into();
                snapshot.trigger = lock.owner_trigger;
                return Ok(snapshot);
            }
            let checkpoint = self
                .checkpoints
                .load(tenant)?
                .map(|c| c.value)
                .filter(|cp| Some(cp.run_id) == lock.run_id);
            return Ok(ProgressSnapshot::derive(tenant.clone(), &lock, checkpoint.as_ref()));
        }

        match published {
            Some(snapshot) if snapshot.status.is_terminal() => Ok(snapshot),
            _ => {
                // A failed run keeps its checkpoint so it can be resumed
                let checkpoint = self
                    .checkpoints
                    .load(tenant)?
                    .map(|c| c.value)
                    .filter(|cp| Some(cp.run_id) == lock.run_id);
                let mut snapshot = ProgressSnapshot::derive(tenant.clone(), &lock, checkpoint.as_ref());
                if snapshot.status == SyncStatus::Completed {
                    snapshot.current_index_name = None;
                }
                Ok(snapshot)
            }
        }
    }
}
