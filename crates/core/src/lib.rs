//! Core types for indexsync
//!
//! This crate defines the vocabulary shared by the storage layer, the sync
//! engine and the trigger front ends:
//! - Identifiers: [`TenantId`], [`RunId`], [`TriggerSource`], [`Version`]
//! - Run lifecycle: [`RunLock`], [`Checkpoint`], [`ProgressSnapshot`]
//! - Content: [`ContentRecord`], [`IndexDocument`], [`Batch`], [`BulkResult`]
//! - Errors: [`SyncError`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod error;
pub mod options;
pub mod run_types;
pub mod types;

pub use document::{Batch, BulkResult, ContentRecord, DocumentFailure, DocumentOutcome, IndexDocument};
pub use error::{Result, SyncError};
pub use options::{IndexSelection, SyncOptions};
pub use run_types::{
    Checkpoint, ErrorEntry, LockStatus, ProgressSnapshot, RunLock, RunOutcome, Stage, SyncStatus,
    BUSY_MESSAGE, SYNC_COMPLETE, SYNC_PAUSED,
};
pub use types::{RecordId, RunId, TenantId, TriggerSource, Version};
