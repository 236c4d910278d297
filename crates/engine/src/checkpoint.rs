//! Durable run checkpoints
//!
//! ## Claims
//!
//! Each worker writes a fresh claim id into the checkpoint when it enters the
//! loop, bumping the checkpoint version. From then on it saves with CAS
//! against the version it last wrote. If a pause-then-resume races with a
//! worker that has not reached its batch boundary yet, the resumed worker's
//! claim makes the old worker's next save conflict; the old worker then
//! exits as superseded and never touches the lock.

use indexsync_core::{Checkpoint, Result, RunId, SyncError, TenantId, Version};
use indexsync_storage::{CellValue, StateCell, StateStore, StorageError, Transition};
use std::sync::Arc;
use uuid::Uuid;

/// Key of the checkpoint cell
pub const CHECKPOINT_KEY: &str = "checkpoint";

/// Outcome of a checkpoint save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Written at the new version
    Saved(Version),
    /// Another worker claimed the checkpoint
    Superseded,
}

/// Checkpoints of every tenant
#[derive(Clone)]
pub struct CheckpointStore {
    cell: StateCell<Checkpoint>,
}

impl CheckpointStore {
    /// Create a store over a state store
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        CheckpointStore {
            cell: StateCell::new(store, CHECKPOINT_KEY),
        }
    }

    /// Current checkpoint of a tenant
    pub fn load(&self, tenant: &TenantId) -> Result<Option<CellValue<Checkpoint>>> {
        self.cell.read(tenant).map_err(persistence)
    }

    /// Overwrite the checkpoint, whatever is stored
    pub fn reset(&self, tenant: &TenantId, checkpoint: &Checkpoint) -> Result<Version> {
        let ((), version) = self
            .cell
            .transition(tenant, |_| -> std::result::Result<_, StorageError> {
                Ok(Transition::Set(checkpoint.clone(), ()))
            })
            .map_err(persistence)?;
        version_of(version)
    }

    /// Stamp a new claim on the checkpoint of `run_id`
    ///
    /// Returns `None` if there is no checkpoint for that run.
    pub fn claim(&self, tenant: &TenantId, run_id: RunId, claim: Uuid) -> Result<Option<(Checkpoint, Version)>> {
        let (claimed, version) = self
            .cell
            .transition(tenant, |current| -> std::result::Result<_, StorageError> {
                Ok(match current {
                    Some(cp) if cp.run_id == run_id => {
                        let mut cp = cp.clone();
                        cp.claim = Some(claim);
                        Transition::Set(cp.clone(), Some(cp))
                    }
                    _ => Transition::Keep(None),
                })
            })
            .map_err(persistence)?;
        match (claimed, version) {
            (Some(cp), Some(v)) => Ok(Some((cp, v))),
            _ => Ok(None),
        }
    }

    /// Save progress if this worker's claim still holds
    pub fn save(&self, tenant: &TenantId, expected: Version, checkpoint: &Checkpoint) -> Result<SaveOutcome> {
        match self.cell.cas(tenant, expected, checkpoint) {
            Ok(v) => Ok(SaveOutcome::Saved(v)),
            Err(e) if e.is_conflict() => Ok(SaveOutcome::Superseded),
            Err(e) => Err(persistence(e)),
        }
    }

    /// Delete the checkpoint if this worker's claim still holds
    pub fn finish(&self, tenant: &TenantId, expected: Version) -> Result<SaveOutcome> {
        match self.cell.delete(tenant, expected) {
            Ok(()) => Ok(SaveOutcome::Saved(expected)),
            Err(e) if e.is_conflict() => Ok(SaveOutcome::Superseded),
            Err(e) => Err(persistence(e)),
        }
    }

    /// Delete the checkpoint; returns whether one existed
    pub fn delete(&self, tenant: &TenantId) -> Result<bool> {
        self.cell.clear(tenant).map_err(persistence)
    }
}

fn persistence(e: StorageError) -> SyncError {
    SyncError::CheckpointPersistence(e.to_string())
}

fn version_of(version: Option<Version>) -> Result<Version> {
    version.ok_or_else(|| SyncError::CheckpointPersistence("checkpoint write returned no version".into()))
}
