//! Convenient imports for indexsync.
//!
//! ```ignore
//! use indexsync::prelude::*;
//!
//! let sync = IndexSync::ephemeral()?;
//! let status = sync.status(&TenantId::new("1"))?;
//! ```

// Main entry point
pub use crate::sync::{IndexSync, IndexSyncBuilder};

// Error handling
pub use crate::error::{Error, Result};

// Run control
pub use indexsync_core::{IndexSelection, SyncOptions, TenantId, TriggerSource};

// Progress
pub use indexsync_core::{ProgressSnapshot, SyncStatus};
pub use indexsync_engine::{IndexHealth, RunExit, SyncHandle};

// Configuration
pub use indexsync_engine::SyncConfig;
