//! # indexsync
//!
//! Resumable, cancellable bulk synchronization of a content store into a
//! search index.
//!
//! A run walks every record of a tenant's content in ascending id order,
//! maps records into index documents and bulk-indexes them. Progress is
//! checkpointed after every batch, so a run can be paused, resumed, taken
//! over after a crash, or cancelled, from any trigger source.
//!
//! ## Quick Start
//!
//! ```ignore
//! use indexsync::prelude::*;
//!
//! let sync = IndexSync::open("./indexsync.toml")?;
//! let tenant = TenantId::new("1");
//!
//! // Start in the background
//! let handle = sync.start(&tenant, TriggerSource::Cli, &SyncOptions::new().setup(true))?;
//!
//! // Any trigger source may look at progress
//! println!("{}", sync.status(&tenant)?.message());
//!
//! // Only one run per tenant
//! let busy = sync.start(&tenant, TriggerSource::Dashboard, &SyncOptions::new());
//! assert!(busy.unwrap_err().is_busy());
//!
//! handle.wait()?;
//! ```
//!
//! ## Run Control
//!
//! | Operation | From | To |
//! |-----------|------|----|
//! | [`IndexSync::start`] | Idle | Running |
//! | [`IndexSync::pause`] | Running | Paused |
//! | [`IndexSync::resume`] | Paused | Running |
//! | [`IndexSync::cancel`] | Running / Paused | Cancelled |
//!
//! ## Crates
//!
//! - `indexsync-core`: identifiers, run lock, checkpoint, errors
//! - `indexsync-storage`: versioned compare-and-swap state stores
//! - `indexsync-engine`: coordinator, worker loop, mappers, backends

#![warn(missing_docs)]

mod error;
mod sync;

pub mod prelude;

// Re-export main entry points
pub use error::{Error, Result};
pub use sync::{IndexSync, IndexSyncBuilder};

// Re-export engine and core types
pub use indexsync_core::{
    Checkpoint, ContentRecord, IndexDocument, IndexSelection, LockStatus, ProgressSnapshot,
    RecordId, RunId, RunLock, RunOutcome, SyncOptions, SyncStatus, TenantId, TriggerSource,
    BUSY_MESSAGE, SYNC_COMPLETE, SYNC_PAUSED,
};
pub use indexsync_engine::{
    BackendKind, ContentStore, DocumentMapper, ElasticsearchBackend, IndexHealth,
    JsonlContentStore, MemoryBackend, MemoryContentStore, RunExit, SearchBackend, SyncConfig,
    SyncHandle,
};
