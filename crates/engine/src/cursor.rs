//! Keyset cursor over one collection of one tenant
//!
//! The cursor keeps no state of its own: its position is the id of the last
//! record processed, stored in the run's checkpoint. Every call asks for
//! records with a strictly greater id, which makes the walk:
//! - resumable from any persisted position
//! - tolerant to inserts and deletes between calls (no skips, no repeats)

use crate::content::{ContentError, ContentStore};
use indexsync_core::{Batch, RecordId, TenantId};

/// Forward cursor over `(tenant, collection)`
pub struct ContentCursor<'a> {
    store: &'a dyn ContentStore,
    tenant: &'a TenantId,
    collection: &'a str,
}

impl<'a> ContentCursor<'a> {
    /// Create a cursor
    pub fn new(store: &'a dyn ContentStore, tenant: &'a TenantId, collection: &'a str) -> Self {
        ContentCursor {
            store,
            tenant,
            collection,
        }
    }

    /// Next batch after `resume_id`; an empty batch means the walk is done
    pub fn next(&self, resume_id: Option<RecordId>, batch_size: usize) -> Result<Batch, ContentError> {
        if batch_size == 0 {
            return Ok(Batch::default());
        }
        let mut records = self
            .store
            .fetch_after(self.tenant, self.collection, resume_id, batch_size)?;
        // A store returning ids at or below the position would make the walk loop
        records.retain(|r| resume_id.map_or(true, |id| r.id > id));
        records.sort_by_key(|r| r.id);
        records.dedup_by_key(|r| r.id);
        Ok(Batch::new(records))
    }

    /// Records in the collection
    pub fn count(&self) -> Result<u64, ContentError> {
        self.store.count(self.tenant, self.collection)
    }
}
