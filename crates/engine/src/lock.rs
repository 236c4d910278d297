//! Per-tenant run lock
//!
//! The lock lives in the shared state store under the key `run_lock` and is
//! only ever changed through CAS transitions, so a dashboard process and a
//! CLI process racing to start a run cannot both win.
//!
//! ## Busy Rules
//!
//! | Lock | Request | Result |
//! |------|---------|--------|
//! | Idle | start | acquired |
//! | Paused, same trigger | start with resume | resumed |
//! | Running, stale heartbeat, takeover enabled | start with resume | taken over |
//! | held | anything else | `Busy` |

use chrono::{Duration, Utc};
use indexsync_core::{
    LockStatus, Result, RunId, RunLock, RunOutcome, SyncError, TenantId, TriggerSource,
};
use indexsync_storage::{StateCell, StateStore, Transition};
use std::sync::Arc;

/// Key of the lock cell
pub const RUN_LOCK_KEY: &str = "run_lock";

/// How a start request obtained the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// The lock was free; a new run begins
    Fresh(RunId),
    /// The owner resumed its paused run
    Resumed(RunId),
    /// A run abandoned by a crashed process was taken over
    TakenOver(RunId),
}

impl Acquisition {
    /// Run that now owns the lock
    pub fn run_id(&self) -> RunId {
        match self {
            Acquisition::Fresh(id) | Acquisition::Resumed(id) | Acquisition::TakenOver(id) => *id,
        }
    }

    /// Check if an existing run continues
    pub fn continues_run(&self) -> bool {
        !matches!(self, Acquisition::Fresh(_))
    }
}

/// What a cancel request did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancellation {
    /// The worker will stop at its next batch boundary
    Deferred(RunId),
    /// The run was paused; the lock was released right away
    Immediate(RunId),
}

/// CAS-guarded run locks of every tenant
#[derive(Clone)]
pub struct RunLockTable {
    cell: StateCell<RunLock>,
    stale_after: Option<Duration>,
}

impl RunLockTable {
    /// Create a table over a state store
    pub fn new(store: Arc<dyn StateStore>, stale_after: Option<Duration>) -> Self {
        RunLockTable {
            cell: StateCell::new(store, RUN_LOCK_KEY),
            stale_after,
        }
    }

    /// Current lock of a tenant; `Idle` if none was ever taken
    pub fn read(&self, tenant: &TenantId) -> Result<RunLock> {
        Ok(self.cell.read(tenant)?.map(|c| c.value).unwrap_or_default())
    }

    /// Try to take the lock for a start request
    pub fn acquire(
        &self,
        tenant: &TenantId,
        trigger: TriggerSource,
        network_wide: bool,
        resume: bool,
    ) -> Result<Acquisition> {
        let candidate = RunId::new();
        let stale_after = self.stale_after;
        let (acquisition, _) = self.cell.transition(tenant, |current| -> Result<_> {
            let now = Utc::now();
            let lock = current.cloned().unwrap_or_default();
            let stale = stale_after.map_or(false, |t| lock.is_stale(now, t));

            let fresh = || {
                let mut acquired = RunLock::acquired(trigger, candidate, network_wide, now);
                acquired.last_outcome = lock.last_outcome.clone();
                Transition::Set(acquired, Acquisition::Fresh(candidate))
            };

            match lock.status {
                LockStatus::Idle => Ok(fresh()),
                LockStatus::Paused if resume && lock.owner_trigger == Some(trigger) => {
                    let run_id = owned_run(tenant, &lock)?;
                    Ok(Transition::Set(
                        lock.with_status(LockStatus::Running, now),
                        Acquisition::Resumed(run_id),
                    ))
                }
                LockStatus::Running if stale && resume => {
                    let run_id = owned_run(tenant, &lock)?;
                    let mut taken = lock.with_status(LockStatus::Running, now);
                    taken.owner_trigger = Some(trigger);
                    Ok(Transition::Set(taken, Acquisition::TakenOver(run_id)))
                }
                // The cancelled run's worker died before finishing the cancel
                LockStatus::Cancelling if stale => Ok(fresh()),
                _ => Err(SyncError::busy(tenant.clone(), lock.owner_trigger)),
            }
        })?;
        Ok(acquisition)
    }

    /// `Running` → `Paused`
    pub fn pause(&self, tenant: &TenantId) -> Result<RunLock> {
        let (lock, _) = self.cell.transition(tenant, |current| -> Result<_> {
            let lock = current.cloned().unwrap_or_default();
            match lock.status {
                LockStatus::Running => {
                    let paused = lock.with_status(LockStatus::Paused, Utc::now());
                    Ok(Transition::Set(paused.clone(), paused))
                }
                status => Err(invalid(tenant, "pause", status)),
            }
        })?;
        Ok(lock)
    }

    /// `Paused` → `Running`, owner trigger only
    ///
    /// A stale `Running` lock is taken over by whichever trigger resumes it.
    pub fn resume(&self, tenant: &TenantId, trigger: TriggerSource) -> Result<RunId> {
        let stale_after = self.stale_after;
        let (run_id, _) = self.cell.transition(tenant, |current| -> Result<_> {
            let now = Utc::now();
            let lock = current.cloned().unwrap_or_default();
            let stale = stale_after.map_or(false, |t| lock.is_stale(now, t));
            match lock.status {
                LockStatus::Idle => Err(invalid(tenant, "resume", lock.status)),
                LockStatus::Running if stale => {
                    let run_id = owned_run(tenant, &lock)?;
                    let mut taken = lock.with_status(LockStatus::Running, now);
                    taken.owner_trigger = Some(trigger);
                    Ok(Transition::Set(taken, run_id))
                }
                _ if lock.owner_trigger != Some(trigger) => {
                    Err(SyncError::busy(tenant.clone(), lock.owner_trigger))
                }
                LockStatus::Paused => {
                    let run_id = owned_run(tenant, &lock)?;
                    Ok(Transition::Set(lock.with_status(LockStatus::Running, now), run_id))
                }
                status => Err(invalid(tenant, "resume", status)),
            }
        })?;
        Ok(run_id)
    }

    /// Request cancellation
    ///
    /// A stale lock has no worker left to observe the request, so it is
    /// released on the spot.
    pub fn cancel(&self, tenant: &TenantId) -> Result<Cancellation> {
        let stale_after = self.stale_after;
        let (cancellation, _) = self.cell.transition(tenant, |current| -> Result<_> {
            let now = Utc::now();
            let lock = current.cloned().unwrap_or_default();
            let stale = stale_after.map_or(false, |t| lock.is_stale(now, t));
            match lock.status {
                LockStatus::Running | LockStatus::Cancelling if stale => {
                    let run_id = owned_run(tenant, &lock)?;
                    Ok(Transition::Set(
                        lock.released(RunOutcome::Cancelled),
                        Cancellation::Immediate(run_id),
                    ))
                }
                LockStatus::Running => {
                    let run_id = owned_run(tenant, &lock)?;
                    Ok(Transition::Set(
                        lock.with_status(LockStatus::Cancelling, now),
                        Cancellation::Deferred(run_id),
                    ))
                }
                LockStatus::Cancelling => Ok(Transition::Keep(Cancellation::Deferred(owned_run(tenant, &lock)?))),
                LockStatus::Paused => {
                    let run_id = owned_run(tenant, &lock)?;
                    Ok(Transition::Set(
                        lock.released(RunOutcome::Cancelled),
                        Cancellation::Immediate(run_id),
                    ))
                }
                LockStatus::Idle => Err(invalid(tenant, "cancel", lock.status)),
            }
        })?;
        Ok(cancellation)
    }

    /// Refresh the heartbeat of a running lock owned by `run_id`
    ///
    /// Returns the lock status, or `None` if the run no longer owns the lock.
    pub fn heartbeat(&self, tenant: &TenantId, run_id: RunId) -> Result<Option<LockStatus>> {
        let (status, _) = self.cell.transition(tenant, |current| -> Result<_> {
            match current {
                Some(lock) if lock.is_owned_by(run_id) => {
                    if lock.status == LockStatus::Running {
                        Ok(Transition::Set(
                            lock.with_status(LockStatus::Running, Utc::now()),
                            Some(LockStatus::Running),
                        ))
                    } else {
                        Ok(Transition::Keep(Some(lock.status)))
                    }
                }
                _ => Ok(Transition::Keep(None)),
            }
        })?;
        Ok(status)
    }

    /// Release the lock if `run_id` still owns it
    pub fn release(&self, tenant: &TenantId, run_id: RunId, outcome: RunOutcome) -> Result<bool> {
        let (released, _) = self.cell.transition(tenant, |current| -> Result<_> {
            match current {
                Some(lock) if lock.is_owned_by(run_id) => {
                    Ok(Transition::Set(lock.released(outcome.clone()), true))
                }
                _ => Ok(Transition::Keep(false)),
            }
        })?;
        Ok(released)
    }

    /// Undo a fresh acquisition that turned out to conflict
    ///
    /// The lock goes back to `Idle` with the previous run's outcome, as if
    /// the start had never happened.
    pub fn abandon(&self, tenant: &TenantId, run_id: RunId) -> Result<bool> {
        let (abandoned, _) = self.cell.transition(tenant, |current| -> Result<_> {
            match current {
                Some(lock) if lock.is_owned_by(run_id) => Ok(Transition::Set(
                    RunLock {
                        last_outcome: lock.last_outcome.clone(),
                        ..RunLock::idle()
                    },
                    true,
                )),
                _ => Ok(Transition::Keep(false)),
            }
        })?;
        Ok(abandoned)
    }

    /// Fail with `Busy` if the tenant's lock is held
    pub fn ensure_free(&self, tenant: &TenantId) -> Result<()> {
        let lock = self.read(tenant)?;
        if lock.is_held() {
            Err(SyncError::busy(tenant.clone(), lock.owner_trigger))
        } else {
            Ok(())
        }
    }
}

fn owned_run(tenant: &TenantId, lock: &RunLock) -> Result<RunId> {
    lock.run_id
        .ok_or_else(|| SyncError::Internal(format!("held lock of tenant {} has no run id", tenant)))
}

fn invalid(tenant: &TenantId, action: &'static str, status: LockStatus) -> SyncError {
    SyncError::InvalidTransition {
        tenant: tenant.clone(),
        action,
        status,
    }
}
