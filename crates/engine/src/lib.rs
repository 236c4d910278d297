//! Sync engine for indexsync
//!
//! This crate walks a content store and ships its records into a search
//! backend, one resumable, cancellable run per tenant.
//!
//! # Architecture
//!
//! - [`SyncCoordinator`]: trigger API and background worker loop
//! - [`RunLockTable`] / [`CheckpointStore`]: CAS-guarded run state in the
//!   shared state store
//! - [`ContentCursor`]: keyset cursor over a [`ContentStore`]
//! - [`DocumentMapper`]: record → document mapping, one per index
//! - [`BulkIndexClient`]: chunked, retried writes to a [`SearchBackend`]
//! - [`ProgressReporter`]: snapshots for pollers
//! - [`FeatureRegistry`]: per-tenant index toggles

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod bulk;
pub mod checkpoint;
pub mod config;
pub mod content;
pub mod coordinator;
pub mod cursor;
pub mod features;
pub mod lock;
pub mod mapper;
pub mod progress;

pub use backend::{physical_index_name, BackendError, ElasticsearchBackend, MemoryBackend, SearchBackend};
pub use bulk::{BulkIndexClient, RetryPolicy};
pub use checkpoint::{CheckpointStore, SaveOutcome, CHECKPOINT_KEY};
pub use config::{
    BackendConfig, BackendKind, ConfigError, MapperConfig, RetryConfig, SyncConfig, DEFAULT_STALE_LOCK_AFTER_SECS,
};
pub use content::{ContentError, ContentStore, JsonlContentStore, MemoryContentStore};
pub use coordinator::{IndexHealth, RunExit, SyncCoordinator, SyncHandle};
pub use cursor::ContentCursor;
pub use features::{FeatureRegistry, FEATURES_KEY};
pub use lock::{Acquisition, Cancellation, RunLockTable, RUN_LOCK_KEY};
pub use mapper::{DocumentMapper, MapperSet, MappingError, PostMapper, UserMapper};
pub use progress::ProgressReporter;
