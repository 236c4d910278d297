//! Per-tenant index toggles
//!
//! Every registered mapper is a feature named after its index. A tenant that
//! never toggled anything has all of them enabled. Toggles are refused while
//! a run holds the tenant's lock (or the network lock): the run's plan was
//! built from the toggles in force when it started.

use crate::lock::RunLockTable;
use indexsync_core::{Result, SyncError, TenantId};
use indexsync_storage::{StateCell, StateStore, Transition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Key of the feature cell
pub const FEATURES_KEY: &str = "features";

/// Stored toggles of one tenant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct FeatureToggles {
    disabled: BTreeSet<String>,
}

/// Feature toggles of every tenant
#[derive(Clone)]
pub struct FeatureRegistry {
    cell: StateCell<FeatureToggles>,
    locks: RunLockTable,
    known: BTreeSet<String>,
}

impl FeatureRegistry {
    /// Create a registry for the given feature names
    pub fn new<I, S>(store: Arc<dyn StateStore>, locks: RunLockTable, known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FeatureRegistry {
            cell: StateCell::new(store, FEATURES_KEY),
            locks,
            known: known.into_iter().map(Into::into).collect(),
        }
    }

    /// Registered feature names
    pub fn known(&self) -> &BTreeSet<String> {
        &self.known
    }

    /// Enabled features of a tenant
    pub fn enabled(&self, tenant: &TenantId) -> Result<BTreeSet<String>> {
        let toggles = self.cell.read(tenant)?.map(|c| c.value).unwrap_or_default();
        Ok(self.known.difference(&toggles.disabled).cloned().collect())
    }

    /// Enable or disable a feature; returns the enabled set afterwards
    pub fn set_enabled(&self, tenant: &TenantId, name: &str, enabled: bool) -> Result<BTreeSet<String>> {
        if !self.known.contains(name) {
            return Err(SyncError::Config(format!(
                "unknown feature {:?}; known features: {}",
                name,
                self.known.iter().cloned().collect::<Vec<_>>().join(", ")
            )));
        }

        for scope in [tenant.clone(), TenantId::network()] {
            let lock = self.locks.read(&scope)?;
            if lock.is_held() {
                return Err(SyncError::Busy {
                    tenant: tenant.clone(),
                    owner: lock.owner_trigger,
                    message: format!(
                        "Features cannot be changed while syncing (tenant {})",
                        scope
                    ),
                });
            }
        }

        self.cell.transition(tenant, |current| -> Result<_> {
            let mut toggles = current.cloned().unwrap_or_default();
            let changed = if enabled {
                toggles.disabled.remove(name)
            } else {
                toggles.disabled.insert(name.to_string())
            };
            Ok(if changed {
                Transition::Set(toggles, ())
            } else {
                Transition::Keep(())
            })
        })?;
        self.enabled(tenant)
    }
}
