//! State storage for indexsync
//!
//! This crate implements the shared key-value store that holds every piece
//! of resumable run state:
//! - [`StateStore`]: versioned compare-and-swap store, keyed by tenant
//! - [`ShardedStore`]: in-memory implementation (one process)
//! - [`FileStore`]: durable implementation, atomic across processes
//! - [`StateCell`]: typed JSON cell with retrying transitions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cell;
pub mod error;
pub mod file;
pub mod format;
pub mod sharded;
pub mod traits;

pub use cell::{CellValue, StateCell, Transition, MAX_TRANSITION_RETRIES};
pub use error::{StorageError, StorageResult};
pub use file::{DurabilityMode, FileStore, FileStoreOptions};
pub use sharded::ShardedStore;
pub use traits::{StateStore, Versioned};
