//! Run lifecycle types
//!
//! This module defines the persisted and derived state of a synchronization
//! run:
//!
//! - [`RunLock`]: Mutual-exclusion record, one per tenant
//! - [`Checkpoint`]: Durable cursor position that makes a run resumable
//! - [`ProgressSnapshot`]: Immutable read view handed to pollers
//!
//! ## Lock Transitions
//!
//! | From | To | Trigger |
//! |------|----|---------|
//! | Idle | Running | start |
//! | Running | Paused | pause |
//! | Paused | Running | resume (owner only) |
//! | Running | Cancelling | cancel |
//! | Paused, Cancelling | Idle | cancel completes |
//! | Running | Idle | completion or fatal error |
//!
//! A released lock keeps the outcome of the run it guarded, so readers in
//! other processes can still tell a completed run from a cancelled one.

use crate::types::{RecordId, RunId, TenantId, TriggerSource};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Status string for a finished run
pub const SYNC_COMPLETE: &str = "Sync complete";
/// Status string for a paused run
pub const SYNC_PAUSED: &str = "Sync paused";
/// Message attached to every busy rejection
///
/// Older clients matched the misspelled "An index is already occuring",
/// which this text does not contain. Match on [`SyncError::is_busy`] (or the
/// `"error": "busy"` kind in the CLI's JSON output) rather than on the
/// wording.
///
/// [`SyncError::is_busy`]: crate::SyncError::is_busy
pub const BUSY_MESSAGE: &str = "An index is already occurring";

// ============================================================================
// RunLock
// ============================================================================

/// Status of a tenant's run lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockStatus {
    /// No run holds the lock
    Idle,
    /// A worker is pulling batches
    Running,
    /// The run is suspended at a batch boundary
    Paused,
    /// Cancel was requested; the worker stops at the next boundary
    Cancelling,
}

impl LockStatus {
    /// Check if a run currently holds the lock
    pub fn is_held(&self) -> bool {
        !matches!(self, LockStatus::Idle)
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            LockStatus::Idle => "Idle",
            LockStatus::Running => "Running",
            LockStatus::Paused => "Paused",
            LockStatus::Cancelling => "Cancelling",
        }
    }
}

impl std::fmt::Display for LockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the last run guarded by a lock ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Every stage was exhausted
    Completed {
        /// Records processed by the run
        processed_count: u64,
    },
    /// Cancel was requested and honoured
    Cancelled,
    /// A fatal error stopped the run
    Failed {
        /// Error message surfaced to readers
        message: String,
    },
}

/// Mutual-exclusion record for one tenant
///
/// Stored in the shared state store and only ever replaced through
/// compare-and-swap, so two trigger sources in different processes cannot
/// both observe `Idle` and take the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLock {
    /// Current status
    pub status: LockStatus,
    /// Trigger source that owns the held lock
    pub owner_trigger: Option<TriggerSource>,
    /// Run guarded by the lock, or the last run it guarded once released
    pub run_id: Option<RunId>,
    /// Whether the run walks every site
    #[serde(default)]
    pub network_wide: bool,
    /// When the run was started
    pub started_at: Option<DateTime<Utc>>,
    /// Last time the owning worker made progress
    pub heartbeat_at: Option<DateTime<Utc>>,
    /// Outcome of the previous run, kept after release
    pub last_outcome: Option<RunOutcome>,
}

impl RunLock {
    /// A lock no run has ever taken
    pub fn idle() -> Self {
        RunLock {
            status: LockStatus::Idle,
            owner_trigger: None,
            run_id: None,
            network_wide: false,
            started_at: None,
            heartbeat_at: None,
            last_outcome: None,
        }
    }

    /// A freshly acquired lock in `Running` state
    pub fn acquired(trigger: TriggerSource, run_id: RunId, network_wide: bool, now: DateTime<Utc>) -> Self {
        RunLock {
            status: LockStatus::Running,
            owner_trigger: Some(trigger),
            run_id: Some(run_id),
            network_wide,
            started_at: Some(now),
            heartbeat_at: Some(now),
            last_outcome: None,
        }
    }

    /// Release the lock, remembering which run ended and how
    pub fn released(&self, outcome: RunOutcome) -> Self {
        RunLock {
            run_id: self.run_id,
            last_outcome: Some(outcome),
            ..RunLock::idle()
        }
    }

    /// Copy of this lock with a different status and a fresh heartbeat
    pub fn with_status(&self, status: LockStatus, now: DateTime<Utc>) -> Self {
        RunLock {
            status,
            heartbeat_at: Some(now),
            ..self.clone()
        }
    }

    /// Check if a run currently holds the lock
    pub fn is_held(&self) -> bool {
        self.status.is_held()
    }

    /// Check if this lock is owned by the given run
    pub fn is_owned_by(&self, run_id: RunId) -> bool {
        self.is_held() && self.run_id == Some(run_id)
    }

    /// Check if a `Running` lock stopped heart-beating
    ///
    /// Paused locks never go stale: a paused run is waiting for an explicit
    /// resume, not for a worker.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match (self.status, self.heartbeat_at) {
            (LockStatus::Running | LockStatus::Cancelling, Some(beat)) => now - beat > threshold,
            _ => false,
        }
    }
}

impl Default for RunLock {
    fn default() -> Self {
        Self::idle()
    }
}

// ============================================================================
// Checkpoint
// ============================================================================

/// One unit of a run plan: a single index of a single site
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stage {
    /// Site whose content is read
    pub tenant: TenantId,
    /// Logical index the content is mapped into
    pub index_name: String,
}

impl Stage {
    /// Create a stage
    pub fn new(tenant: TenantId, index_name: impl Into<String>) -> Self {
        Stage {
            tenant,
            index_name: index_name.into(),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant, self.index_name)
    }
}

/// A recorded per-record or per-document failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Record or document id
    pub id: RecordId,
    /// Logical index it was headed to
    pub index_name: String,
    /// Failure reason
    pub reason: String,
}

/// Durable cursor position of a run
///
/// Written after every successful flush. Resuming reads the checkpoint and
/// re-enters the plan at `stage`, pulling records with id greater than
/// `last_processed_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Run this checkpoint belongs to
    pub run_id: RunId,
    /// Worker that currently writes this checkpoint
    pub claim: Option<Uuid>,
    /// Ordered stages of the run
    pub plan: Vec<Stage>,
    /// Index into `plan` of the stage being walked
    pub stage: usize,
    /// Cursor position inside the current stage
    pub last_processed_id: Option<RecordId>,
    /// Records the run expects to read, counted at start
    pub total_items: u64,
    /// Records read so far
    pub processed_count: u64,
    /// Documents accepted by the backend, per logical index
    pub per_index_counts: BTreeMap<String, u64>,
    /// Records excluded by their mapper
    pub skipped_count: u64,
    /// Records that failed to map
    pub mapping_errors: u64,
    /// Documents the backend rejected or never accepted
    pub failed_documents: u64,
    /// Bounded list of the first failures seen
    pub error_summary: Vec<ErrorEntry>,
}

impl Checkpoint {
    /// Create the checkpoint of a fresh run
    pub fn new(run_id: RunId, plan: Vec<Stage>, total_items: u64) -> Self {
        Checkpoint {
            run_id,
            claim: None,
            plan,
            stage: 0,
            last_processed_id: None,
            total_items,
            processed_count: 0,
            per_index_counts: BTreeMap::new(),
            skipped_count: 0,
            mapping_errors: 0,
            failed_documents: 0,
            error_summary: Vec::new(),
        }
    }

    /// Stage currently being walked, `None` once the plan is exhausted
    pub fn current_stage(&self) -> Option<&Stage> {
        self.plan.get(self.stage)
    }

    /// Check if every stage has been walked
    pub fn is_exhausted(&self) -> bool {
        self.stage >= self.plan.len()
    }

    /// Move to the next stage, resetting the cursor position
    pub fn advance_stage(&mut self) {
        self.stage += 1;
        self.last_processed_id = None;
    }

    /// Count documents accepted for an index
    pub fn add_indexed(&mut self, index_name: &str, count: u64) {
        if count > 0 {
            *self.per_index_counts.entry(index_name.to_string()).or_insert(0) += count;
        }
    }

    /// Total documents accepted across indices
    pub fn indexed_total(&self) -> u64 {
        self.per_index_counts.values().sum()
    }

    /// Record a failure, keeping at most `max` entries
    pub fn push_error(&mut self, entry: ErrorEntry, max: usize) {
        if self.error_summary.len() < max {
            self.error_summary.push(entry);
        }
    }
}

// ============================================================================
// ProgressSnapshot
// ============================================================================

/// Status reported to readers
///
/// Extends [`LockStatus`] with the terminal states of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Nothing has run, or state was reset
    Idle,
    /// A worker is pulling batches
    Running,
    /// Suspended at a batch boundary
    Paused,
    /// Cancel requested, waiting for the batch boundary
    Cancelling,
    /// Every stage exhausted
    Completed,
    /// A fatal error stopped the run
    Failed,
    /// Cancel honoured
    Cancelled,
}

impl SyncStatus {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Failed | SyncStatus::Cancelled
        )
    }

    /// Check if a run holds the lock in this state
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncStatus::Running | SyncStatus::Paused | SyncStatus::Cancelling
        )
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "Idle",
            SyncStatus::Running => "Running",
            SyncStatus::Paused => "Paused",
            SyncStatus::Cancelling => "Cancelling",
            SyncStatus::Completed => "Completed",
            SyncStatus::Failed => "Failed",
            SyncStatus::Cancelled => "Cancelled",
        }
    }
}

impl From<LockStatus> for SyncStatus {
    fn from(status: LockStatus) -> Self {
        match status {
            LockStatus::Idle => SyncStatus::Idle,
            LockStatus::Running => SyncStatus::Running,
            LockStatus::Paused => SyncStatus::Paused,
            LockStatus::Cancelling => SyncStatus::Cancelling,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable read view of a tenant's sync progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Tenant the snapshot describes
    pub tenant: TenantId,
    /// Run the snapshot describes
    pub run_id: Option<RunId>,
    /// Current status
    pub status: SyncStatus,
    /// Trigger source owning the run, if one is active
    pub trigger: Option<TriggerSource>,
    /// Records read so far
    pub processed_count: u64,
    /// Records the run expects to read
    pub total_items: u64,
    /// Logical index of the stage being walked
    pub current_index_name: Option<String>,
    /// Documents accepted per logical index
    pub per_index_counts: BTreeMap<String, u64>,
    /// Records or documents that failed
    pub failed_count: u64,
    /// Fatal error message of a failed run
    pub error_message: Option<String>,
}

impl ProgressSnapshot {
    /// Snapshot of a tenant nothing has run for
    pub fn idle(tenant: TenantId) -> Self {
        ProgressSnapshot {
            tenant,
            run_id: None,
            status: SyncStatus::Idle,
            trigger: None,
            processed_count: 0,
            total_items: 0,
            current_index_name: None,
            per_index_counts: BTreeMap::new(),
            failed_count: 0,
            error_message: None,
        }
    }

    /// Derive a snapshot from persisted state
    ///
    /// Used by readers that do not share memory with the worker; the result
    /// is as fresh as the last checkpoint write.
    pub fn derive(tenant: TenantId, lock: &RunLock, checkpoint: Option<&Checkpoint>) -> Self {
        let mut snapshot = ProgressSnapshot::idle(tenant);
        snapshot.run_id = lock.run_id;
        snapshot.status = lock.status.into();
        snapshot.trigger = lock.owner_trigger;

        if let Some(cp) = checkpoint {
            snapshot.apply_checkpoint(cp);
        }

        if !lock.is_held() {
            match &lock.last_outcome {
                Some(RunOutcome::Completed { processed_count }) => {
                    snapshot.status = SyncStatus::Completed;
                    snapshot.processed_count = *processed_count;
                    snapshot.total_items = snapshot.total_items.max(*processed_count);
                }
                Some(RunOutcome::Cancelled) => snapshot.status = SyncStatus::Cancelled,
                Some(RunOutcome::Failed { message }) => {
                    snapshot.status = SyncStatus::Failed;
                    snapshot.error_message = Some(message.clone());
                }
                None => {}
            }
        }
        snapshot
    }

    /// Copy counters from a checkpoint
    pub fn apply_checkpoint(&mut self, cp: &Checkpoint) {
        self.processed_count = cp.processed_count;
        self.total_items = cp.total_items;
        self.current_index_name = cp.current_stage().map(|s| s.index_name.clone());
        self.per_index_counts = cp.per_index_counts.clone();
        self.failed_count = cp.failed_documents + cp.mapping_errors;
    }

    /// Human-facing status line
    pub fn message(&self) -> String {
        match self.status {
            SyncStatus::Idle => "Idle".to_string(),
            SyncStatus::Running => format!(
                "Sync in progress: {}/{}",
                self.processed_count, self.total_items
            ),
            SyncStatus::Paused => SYNC_PAUSED.to_string(),
            SyncStatus::Cancelling => "Cancelling sync".to_string(),
            SyncStatus::Completed => SYNC_COMPLETE.to_string(),
            SyncStatus::Cancelled => "Sync cancelled".to_string(),
            SyncStatus::Failed => format!(
                "Sync failed: {}",
                self.error_message.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    /// Completion ratio in `[0, 1]`
    pub fn fraction(&self) -> f64 {
        if self.total_items == 0 {
            return if self.status == SyncStatus::Completed { 1.0 } else { 0.0 };
        }
        (self.processed_count as f64 / self.total_items as f64).min(1.0)
    }
}
