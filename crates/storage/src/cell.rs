//! Typed CAS cells over a [`StateStore`]
//!
//! A [`StateCell`] names one key (e.g. `run_lock`) and serializes its value
//! as JSON. It provides:
//! - Versioned reads
//! - Compare-and-swap updates
//! - A transition closure with automatic retry on conflict
//!
//! ## Purity Requirement
//!
//! The `transition()` closure may be called multiple times when a concurrent
//! writer wins the race. Closures must be pure functions of the state they
//! are handed: no I/O, no logging, no mutation outside the closure.

use crate::error::{StorageError, StorageResult};
use crate::traits::StateStore;
use indexsync_core::{TenantId, Version};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// Attempts a transition makes before giving up with a conflict
pub const MAX_TRANSITION_RETRIES: usize = 64;

/// A decoded cell value and its version
#[derive(Debug, Clone, PartialEq)]
pub struct CellValue<T> {
    /// Decoded value
    pub value: T,
    /// Version it was read at
    pub version: Version,
}

/// What a transition closure wants done with the cell
#[derive(Debug)]
pub enum Transition<T, R> {
    /// Write a new value
    Set(T, R),
    /// Delete the cell
    Delete(R),
    /// Leave the cell untouched
    Keep(R),
}

/// Named, typed CAS cell
pub struct StateCell<T> {
    store: Arc<dyn StateStore>,
    key: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for StateCell<T> {
    fn clone(&self) -> Self {
        StateCell {
            store: Arc::clone(&self.store),
            key: self.key,
            _marker: PhantomData,
        }
    }
}

impl<T> StateCell<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Create a cell for the given key
    pub fn new(store: Arc<dyn StateStore>, key: &'static str) -> Self {
        StateCell {
            store,
            key,
            _marker: PhantomData,
        }
    }

    /// Key of the cell
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Read the current value
    pub fn read(&self, tenant: &TenantId) -> StorageResult<Option<CellValue<T>>> {
        match self.store.get(tenant, self.key)? {
            Some(versioned) => {
                let value = serde_json::from_slice(&versioned.value)?;
                Ok(Some(CellValue {
                    value,
                    version: versioned.version,
                }))
            }
            None => Ok(None),
        }
    }

    /// Create the cell; fails with a conflict if it exists
    pub fn init(&self, tenant: &TenantId, value: &T) -> StorageResult<Version> {
        self.write(tenant, None, value)
    }

    /// Replace the value if it is still at `expected`
    pub fn cas(&self, tenant: &TenantId, expected: Version, value: &T) -> StorageResult<Version> {
        self.write(tenant, Some(expected), value)
    }

    /// Delete the cell if it is still at `expected`
    pub fn delete(&self, tenant: &TenantId, expected: Version) -> StorageResult<()> {
        self.store
            .compare_and_swap(tenant, self.key, Some(expected), None)
            .map(|_| ())
    }

    /// Delete the cell whatever its version; returns whether it existed
    pub fn clear(&self, tenant: &TenantId) -> StorageResult<bool> {
        let (existed, _) = self.transition(tenant, |current| -> StorageResult<_> {
            Ok(match current {
                Some(_) => Transition::Delete(true),
                None => Transition::Keep(false),
            })
        })?;
        Ok(existed)
    }

    /// Apply a transition closure, retrying on conflict
    ///
    /// Returns the closure's result and the version of the cell afterwards
    /// (`None` if the cell is absent).
    pub fn transition<R, E, F>(&self, tenant: &TenantId, mut f: F) -> Result<(R, Option<Version>), E>
    where
        F: FnMut(Option<&T>) -> Result<Transition<T, R>, E>,
        E: From<StorageError>,
    {
        let mut last_conflict = None;
        for _ in 0..MAX_TRANSITION_RETRIES {
            let current = self.read(tenant)?;
            let expected = current.as_ref().map(|c| c.version);

            let outcome = match f(current.as_ref().map(|c| &c.value))? {
                Transition::Keep(r) => return Ok((r, expected)),
                Transition::Set(value, r) => self.write(tenant, expected, &value).map(|v| (r, Some(v))),
                Transition::Delete(r) => match expected {
                    Some(v) => self.delete(tenant, v).map(|_| (r, None)),
                    None => return Ok((r, None)),
                },
            };

            match outcome {
                Ok(done) => return Ok(done),
                Err(e) if e.is_conflict() => last_conflict = Some(e),
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_conflict
            .unwrap_or_else(|| StorageError::Conflict {
                key: format!("{}/{}", tenant, self.key),
                expected: None,
                actual: None,
            })
            .into())
    }

    fn write(&self, tenant: &TenantId, expected: Option<Version>, value: &T) -> StorageResult<Version> {
        let bytes = serde_json::to_vec(value)?;
        self.store
            .compare_and_swap(tenant, self.key, expected, Some(bytes))?
            .ok_or_else(|| StorageError::Serialization("write produced no version".to_string()))
    }
}
