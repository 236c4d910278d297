//! Sync coordinator
//!
//! Owns the run lifecycle of every tenant: lock acquisition, run planning,
//! the background worker loop, and the pause / resume / cancel transitions.
//!
//! ## Worker Loop
//!
//! ```text
//! claim checkpoint
//! loop {
//!     read lock ── not ours ──────────────▶ exit (lock lost)
//!               ── Paused ────────────────▶ exit (paused)
//!               ── Cancelling ────────────▶ delete checkpoint, release, exit
//!     no stage left ──────────────────────▶ delete checkpoint, release, exit
//!     pull batch ── empty ─▶ next stage
//!                ── records ─▶ map, flush
//!     save checkpoint ── conflict ────────▶ exit (superseded)
//!     publish snapshot, heartbeat
//! }
//! ```
//!
//! Every suspension point is a batch boundary: pause and cancel requests
//! only change the stored lock, and the worker observes them between
//! batches. Because the lock is read from the shared state store, a worker
//! in one process honours a pause issued from another.
//!
//! ## Network-Wide Runs
//!
//! A network-wide run holds the lock of the reserved [`TenantId::network`]
//! tenant and walks every site's content in one plan. It is refused while
//! any site holds its own lock, and a site start is refused while the
//! network lock is held.

use crate::backend::physical_index_name;
use crate::bulk::BulkIndexClient;
use crate::checkpoint::{CheckpointStore, SaveOutcome};
use crate::config::SyncConfig;
use crate::content::ContentStore;
use crate::cursor::ContentCursor;
use crate::features::FeatureRegistry;
use crate::lock::{Acquisition, Cancellation, RunLockTable};
use crate::mapper::{DocumentMapper, MapperSet};
use crate::progress::ProgressReporter;
use indexsync_core::{
    Batch, Checkpoint, ErrorEntry, IndexSelection, LockStatus, ProgressSnapshot, Result, RunId,
    RunLock, RunOutcome, Stage, SyncError, SyncOptions, SyncStatus, TenantId, TriggerSource,
};
use indexsync_storage::StateStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How a worker left the loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    /// Every stage was exhausted
    Completed {
        /// Records processed by the run
        processed_count: u64,
    },
    /// Stopped at a boundary after a pause
    Paused,
    /// Stopped at a boundary after a cancel
    Cancelled,
    /// A fatal error ended the run
    Failed(String),
    /// A newer worker of the same run took over
    Superseded,
    /// The run no longer owns the lock
    LockLost,
}

impl RunExit {
    /// Check if the run itself ended (as opposed to this worker)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunExit::Completed { .. } | RunExit::Cancelled | RunExit::Failed(_)
        )
    }
}

/// Handle on a background worker
#[derive(Debug)]
pub struct SyncHandle {
    tenant: TenantId,
    run_id: RunId,
    worker: JoinHandle<RunExit>,
}

impl SyncHandle {
    /// Tenant whose lock the run holds
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Run the worker drives
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Check if the worker has exited
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Block until the worker exits
    pub fn wait(self) -> Result<RunExit> {
        self.worker
            .join()
            .map_err(|_| SyncError::Internal(format!("sync worker of tenant {} panicked", self.tenant)))
    }
}

/// Health of one logical index of a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexHealth {
    /// Logical index
    pub index_name: String,
    /// Backend index name
    pub physical_name: String,
    /// Whether the tenant has the index enabled
    pub enabled: bool,
    /// Documents stored, `None` when the index does not exist
    pub document_count: Option<u64>,
}

struct Shared {
    config: SyncConfig,
    locks: RunLockTable,
    checkpoints: CheckpointStore,
    features: FeatureRegistry,
    progress: ProgressReporter,
    content: Arc<dyn ContentStore>,
    mappers: MapperSet,
    bulk: BulkIndexClient,
}

/// Entry point of every trigger source
#[derive(Clone)]
pub struct SyncCoordinator {
    shared: Arc<Shared>,
}

impl SyncCoordinator {
    /// Assemble a coordinator
    pub fn new(
        config: SyncConfig,
        state: Arc<dyn StateStore>,
        content: Arc<dyn ContentStore>,
        bulk: BulkIndexClient,
        mappers: MapperSet,
    ) -> Self {
        let locks = RunLockTable::new(Arc::clone(&state), config.stale_lock_after());
        let checkpoints = CheckpointStore::new(Arc::clone(&state));
        let features = FeatureRegistry::new(state, locks.clone(), mappers.names());
        let progress = ProgressReporter::new(locks.clone(), checkpoints.clone());
        SyncCoordinator {
            shared: Arc::new(Shared {
                config,
                locks,
                checkpoints,
                features,
                progress,
                content,
                mappers,
                bulk,
            }),
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Registered mappers
    pub fn mappers(&self) -> &MapperSet {
        &self.shared.mappers
    }

    // ========================================================================
    // Triggers
    // ========================================================================

    /// Start a run, or resume the caller's paused run
    ///
    /// Returns as soon as the worker is spawned.
    pub fn start(&self, tenant: &TenantId, trigger: TriggerSource, options: &SyncOptions) -> Result<SyncHandle> {
        let scope = lock_scope(tenant, options.network_wide)?;
        self.check_scopes(&scope, options.network_wide)?;

        let acquisition = self
            .shared
            .locks
            .acquire(&scope, trigger, options.network_wide, options.resume)?;
        let run_id = acquisition.run_id();

        if !acquisition.continues_run() {
            // A start on the other scope may have slipped in since the check
            if let Err(e) = self.check_scopes(&scope, options.network_wide) {
                self.shared.locks.abandon(&scope, run_id)?;
                return Err(e);
            }
        }

        info!(
            tenant = %scope,
            run_id = %run_id,
            trigger = %trigger,
            network_wide = options.network_wide,
            ?acquisition,
            "Sync run acquired lock"
        );

        if let Err(e) = self.prepare(&scope, acquisition, options) {
            self.shared.fail(&scope, run_id, &e);
            return Err(e);
        }
        self.spawn(scope, run_id)
    }

    /// Suspend a running run at its next batch boundary
    pub fn pause(&self, tenant: &TenantId) -> Result<ProgressSnapshot> {
        let lock = self.shared.locks.pause(tenant)?;
        info!(tenant = %tenant, run_id = ?lock.run_id, "Sync pause requested");
        self.shared.progress.snapshot(tenant)
    }

    /// Resume a paused run; only the trigger that started it may resume it
    pub fn resume(&self, tenant: &TenantId, trigger: TriggerSource) -> Result<SyncHandle> {
        let run_id = self.shared.locks.resume(tenant, trigger)?;
        info!(tenant = %tenant, run_id = %run_id, trigger = %trigger, "Sync resumed");

        let lock = self.shared.locks.read(tenant)?;
        let options = SyncOptions::new().network_wide(lock.network_wide);
        if let Err(e) = self.ensure_checkpoint(tenant, run_id, &options) {
            self.shared.fail(tenant, run_id, &e);
            return Err(e);
        }
        self.spawn(tenant.clone(), run_id)
    }

    /// Cancel a running or paused run
    pub fn cancel(&self, tenant: &TenantId) -> Result<ProgressSnapshot> {
        match self.shared.locks.cancel(tenant)? {
            Cancellation::Deferred(run_id) => {
                info!(tenant = %tenant, run_id = %run_id, "Sync cancel requested");
            }
            Cancellation::Immediate(run_id) => {
                self.shared.checkpoints.delete(tenant)?;
                self.shared.progress.forget(tenant);
                info!(tenant = %tenant, run_id = %run_id, "Sync cancelled with no live worker");
            }
        }
        self.shared.progress.snapshot(tenant)
    }

    /// Current progress
    pub fn status(&self, tenant: &TenantId) -> Result<ProgressSnapshot> {
        self.shared.progress.snapshot(tenant)
    }

    // ========================================================================
    // Index maintenance
    // ========================================================================

    /// Delete the backend indices and checkpoints of a tenant, or of every
    /// site when `network_wide`
    ///
    /// Returns the deleted physical index names.
    pub fn delete_index(&self, tenant: &TenantId, network_wide: bool) -> Result<Vec<String>> {
        let shared = &self.shared;
        let network = TenantId::network();
        shared.locks.ensure_free(&network)?;

        let sites = if network_wide {
            shared.content.tenants()?
        } else {
            lock_scope(tenant, false)?;
            vec![tenant.clone()]
        };
        for site in &sites {
            shared.locks.ensure_free(site)?;
        }

        let mut deleted = Vec::new();
        for site in &sites {
            for mapper in shared.mappers.all() {
                let physical = shared.physical(site, mapper.index_name());
                shared.bulk.delete_index(&physical)?;
                deleted.push(physical);
            }
            shared.checkpoints.delete(site)?;
            shared.progress.forget(site);
        }
        if network_wide {
            shared.checkpoints.delete(&network)?;
            shared.progress.forget(&network);
        }

        info!(tenant = %tenant, network_wide, indices = deleted.len(), "Deleted indices");
        Ok(deleted)
    }

    /// Document counts of every registered index of a tenant
    pub fn health(&self, tenant: &TenantId) -> Result<Vec<IndexHealth>> {
        let shared = &self.shared;
        let enabled = shared.features.enabled(tenant)?;
        shared
            .mappers
            .all()
            .iter()
            .map(|mapper| -> Result<IndexHealth> {
                let physical_name = shared.physical(tenant, mapper.index_name());
                Ok(IndexHealth {
                    index_name: mapper.index_name().to_string(),
                    document_count: shared.bulk.document_count(&physical_name)?,
                    enabled: enabled.contains(mapper.index_name()),
                    physical_name,
                })
            })
            .collect()
    }

    /// Enabled indices of a tenant
    pub fn features(&self, tenant: &TenantId) -> Result<BTreeSet<String>> {
        self.shared.features.enabled(tenant)
    }

    /// Enable or disable an index for a tenant
    pub fn set_feature(&self, tenant: &TenantId, name: &str, enabled: bool) -> Result<BTreeSet<String>> {
        let now = self.shared.features.set_enabled(tenant, name, enabled)?;
        info!(tenant = %tenant, feature = name, enabled, "Feature toggled");
        Ok(now)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn check_scopes(&self, scope: &TenantId, network_wide: bool) -> Result<()> {
        if network_wide {
            for site in self.shared.content.tenants()? {
                self.shared.locks.ensure_free(&site)?;
            }
            Ok(())
        } else {
            debug_assert!(!scope.is_network());
            self.shared.locks.ensure_free(&TenantId::network())
        }
    }

    fn prepare(&self, scope: &TenantId, acquisition: Acquisition, options: &SyncOptions) -> Result<()> {
        let shared = &self.shared;
        let run_id = acquisition.run_id();

        if acquisition.continues_run() {
            return self.ensure_checkpoint(scope, run_id, options);
        }

        if options.resume && !options.setup {
            if let Some(stored) = shared.checkpoints.load(scope)? {
                let mut cp = stored.value;
                info!(
                    tenant = %scope,
                    run_id = %run_id,
                    previous_run = %cp.run_id,
                    processed = cp.processed_count,
                    "Resuming from stored checkpoint"
                );
                cp.run_id = run_id;
                cp.claim = None;
                shared.checkpoints.reset(scope, &cp)?;
                return Ok(());
            }
        }

        let cp = self.fresh_checkpoint(scope, run_id, options)?;
        if options.setup {
            for stage in &cp.plan {
                let mapper = shared.mapper(&stage.index_name)?;
                let physical = shared.physical(&stage.tenant, &stage.index_name);
                shared.bulk.setup_index(&physical, &mapper.mapping())?;
                info!(index = %physical, "Index recreated");
            }
        }
        shared.checkpoints.reset(scope, &cp)?;
        Ok(())
    }

    fn ensure_checkpoint(&self, scope: &TenantId, run_id: RunId, options: &SyncOptions) -> Result<()> {
        match self.shared.checkpoints.load(scope)? {
            Some(stored) if stored.value.run_id == run_id => Ok(()),
            _ => {
                warn!(tenant = %scope, run_id = %run_id, "No checkpoint for run, planning from scratch");
                let cp = self.fresh_checkpoint(scope, run_id, options)?;
                self.shared.checkpoints.reset(scope, &cp)?;
                Ok(())
            }
        }
    }

    fn fresh_checkpoint(&self, scope: &TenantId, run_id: RunId, options: &SyncOptions) -> Result<Checkpoint> {
        let shared = &self.shared;
        let sites = if options.network_wide {
            shared.content.tenants()?
        } else {
            vec![scope.clone()]
        };

        let mut plan = Vec::new();
        let mut total = 0;
        let mut malformed = 0;
        for site in sites {
            let enabled = shared.features.enabled(&site)?;
            for mapper in shared.mappers.select(&options.index_names, &enabled) {
                total += shared.content.count(&site, mapper.collection())?;
                let bad = shared.content.malformed(&site, mapper.collection())?;
                if bad > 0 {
                    warn!(tenant = %site, collection = mapper.collection(), count = bad, "Unreadable content entries");
                    malformed += bad;
                }
                plan.push(Stage::new(site.clone(), mapper.index_name()));
            }
        }
        if let IndexSelection::Only(names) = &options.index_names {
            for name in names.iter().filter(|n| shared.mappers.get(n).is_none()) {
                warn!(index = %name, "Ignoring unknown index");
            }
        }

        debug!(tenant = %scope, run_id = %run_id, stages = plan.len(), total, "Planned run");
        let mut cp = Checkpoint::new(run_id, plan, total);
        cp.mapping_errors = malformed;
        Ok(cp)
    }

    fn spawn(&self, scope: TenantId, run_id: RunId) -> Result<SyncHandle> {
        let shared = Arc::clone(&self.shared);
        let worker_scope = scope.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("indexsync-{}", scope))
            .spawn(move || shared.run_worker(&worker_scope, run_id));

        match spawned {
            Ok(worker) => Ok(SyncHandle {
                tenant: scope,
                run_id,
                worker,
            }),
            Err(e) => {
                let err = SyncError::Io(e);
                self.shared.fail(&scope, run_id, &err);
                Err(err)
            }
        }
    }
}

impl Shared {
    fn mapper(&self, index_name: &str) -> Result<Arc<dyn DocumentMapper>> {
        self.mappers
            .get(index_name)
            .cloned()
            .ok_or_else(|| SyncError::Config(format!("no mapper registered for index {}", index_name)))
    }

    fn physical(&self, tenant: &TenantId, index_name: &str) -> String {
        physical_index_name(&self.config.index_prefix, tenant, index_name)
    }

    fn run_worker(&self, scope: &TenantId, run_id: RunId) -> RunExit {
        match self.drive(scope, run_id) {
            Ok(exit) => exit,
            Err(e) => {
                self.fail(scope, run_id, &e);
                RunExit::Failed(e.to_string())
            }
        }
    }

    /// Release the lock with a failure outcome; the checkpoint stays so the
    /// run can be resumed
    fn fail(&self, scope: &TenantId, run_id: RunId, err: &SyncError) {
        let message = err.to_string();
        error!(tenant = %scope, run_id = %run_id, error = %message, "Sync failed");
        if let Err(e) = self
            .locks
            .release(scope, run_id, RunOutcome::Failed { message })
        {
            error!(tenant = %scope, run_id = %run_id, error = %e, "Cannot release lock of failed run");
        }
        self.progress.forget(scope);
    }

    fn drive(&self, scope: &TenantId, run_id: RunId) -> Result<RunExit> {
        let claim = Uuid::new_v4();
        let Some((mut cp, mut version)) = self.checkpoints.claim(scope, run_id, claim)? else {
            if !self.locks.read(scope)?.is_owned_by(run_id) {
                return Ok(RunExit::LockLost);
            }
            return Err(SyncError::CheckpointPersistence(format!(
                "no checkpoint for run {}",
                run_id
            )));
        };
        info!(
            tenant = %scope,
            run_id = %run_id,
            stage = cp.stage,
            processed = cp.processed_count,
            "Worker entered sync loop"
        );

        loop {
            let lock = self.locks.read(scope)?;
            if !lock.is_owned_by(run_id) {
                info!(tenant = %scope, run_id = %run_id, "Run no longer owns the lock");
                return Ok(RunExit::LockLost);
            }
            match lock.status {
                LockStatus::Paused => {
                    info!(tenant = %scope, run_id = %run_id, processed = cp.processed_count, "Sync paused");
                    return Ok(RunExit::Paused);
                }
                LockStatus::Cancelling => return self.finish_cancelled(scope, run_id, &lock, &cp),
                LockStatus::Running | LockStatus::Idle => {}
            }

            let Some(stage) = cp.current_stage().cloned() else {
                return self.finish_completed(scope, run_id, &lock, &cp, version);
            };
            let mapper = self.mapper(&stage.index_name)?;
            let batch = ContentCursor::new(self.content.as_ref(), &stage.tenant, mapper.collection())
                .next(cp.last_processed_id, self.config.batch_size)?;

            if batch.is_empty() {
                debug!(tenant = %scope, stage = %stage, "Stage exhausted");
                cp.advance_stage();
            } else {
                self.process_batch(&stage, mapper.as_ref(), &batch, &mut cp);
            }

            match self.checkpoints.save(scope, version, &cp)? {
                SaveOutcome::Saved(v) => version = v,
                SaveOutcome::Superseded => {
                    info!(tenant = %scope, run_id = %run_id, "Worker superseded by a newer claim");
                    return Ok(RunExit::Superseded);
                }
            }
            self.progress.publish(ProgressSnapshot::derive(scope.clone(), &lock, Some(&cp)));

            if self.locks.heartbeat(scope, run_id)?.is_none() {
                return Ok(RunExit::LockLost);
            }
            if self.config.throttle_ms > 0 {
                std::thread::sleep(self.config.throttle());
            }
        }
    }

    fn process_batch(&self, stage: &Stage, mapper: &dyn DocumentMapper, batch: &Batch, cp: &mut Checkpoint) {
        let max_errors = self.config.max_error_summary;
        let mut documents = Vec::with_capacity(batch.len());
        for record in &batch.records {
            match mapper.map(record) {
                Ok(Some(doc)) => documents.push(doc),
                Ok(None) => cp.skipped_count += 1,
                Err(e) => {
                    debug!(stage = %stage, record = record.id, reason = %e.reason, "Record failed to map");
                    cp.mapping_errors += 1;
                    cp.push_error(
                        ErrorEntry {
                            id: record.id,
                            index_name: stage.index_name.clone(),
                            reason: e.reason,
                        },
                        max_errors,
                    );
                }
            }
        }

        if !documents.is_empty() {
            let physical = self.physical(&stage.tenant, &stage.index_name);
            let result = self.bulk.flush(&physical, &documents);
            cp.add_indexed(&stage.index_name, result.succeeded_ids.len() as u64);
            cp.failed_documents += result.failed.len() as u64;
            for failure in result.failed {
                cp.push_error(
                    ErrorEntry {
                        id: failure.id,
                        index_name: stage.index_name.clone(),
                        reason: failure.reason,
                    },
                    max_errors,
                );
            }
        }

        cp.processed_count += batch.len() as u64;
        cp.last_processed_id = batch.last_id();
        debug!(
            stage = %stage,
            processed = cp.processed_count,
            total = cp.total_items,
            "Batch done"
        );
    }

    fn finish_completed(
        &self,
        scope: &TenantId,
        run_id: RunId,
        lock: &RunLock,
        cp: &Checkpoint,
        version: indexsync_core::Version,
    ) -> Result<RunExit> {
        if self.checkpoints.finish(scope, version)? == SaveOutcome::Superseded {
            return Ok(RunExit::Superseded);
        }
        let processed_count = cp.processed_count;
        self.locks
            .release(scope, run_id, RunOutcome::Completed { processed_count })?;

        let mut snapshot = ProgressSnapshot::derive(scope.clone(), lock, Some(cp));
        snapshot.status = SyncStatus::Completed;
        snapshot.current_index_name = None;
        self.progress.publish(snapshot);

        info!(
            tenant = %scope,
            run_id = %run_id,
            processed = processed_count,
            indexed = cp.indexed_total(),
            failed = cp.failed_documents + cp.mapping_errors,
            "Sync complete"
        );
        Ok(RunExit::Completed { processed_count })
    }

    fn finish_cancelled(&self, scope: &TenantId, run_id: RunId, lock: &RunLock, cp: &Checkpoint) -> Result<RunExit> {
        self.checkpoints.delete(scope)?;
        self.locks.release(scope, run_id, RunOutcome::Cancelled)?;

        let mut snapshot = ProgressSnapshot::derive(scope.clone(), lock, Some(cp));
        snapshot.status = SyncStatus::Cancelled;
        self.progress.publish(snapshot);

        info!(tenant = %scope, run_id = %run_id, processed = cp.processed_count, "Sync cancelled");
        Ok(RunExit::Cancelled)
    }
}

/// Tenant whose lock a request takes
fn lock_scope(tenant: &TenantId, network_wide: bool) -> Result<TenantId> {
    if network_wide {
        return Ok(TenantId::network());
    }
    if !tenant.is_valid() {
        return Err(SyncError::Config(format!("invalid tenant id {:?}", tenant.as_str())));
    }
    if tenant.is_network() {
        return Err(SyncError::Config(format!(
            "tenant {} is reserved for network-wide runs",
            tenant
        )));
    }
    Ok(tenant.clone())
}
