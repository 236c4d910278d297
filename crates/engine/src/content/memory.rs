use super::{ContentError, ContentStore};
use indexsync_core::{ContentRecord, RecordId, TenantId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

type Collection = BTreeMap<RecordId, ContentRecord>;

/// In-process content store
///
/// Collections are ordered maps, so `fetch_after` is a range scan.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    collections: RwLock<BTreeMap<TenantId, BTreeMap<String, Collection>>>,
}

impl MemoryContentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record
    pub fn insert(&self, tenant: &TenantId, collection: &str, record: ContentRecord) {
        self.collections
            .write()
            .entry(tenant.clone())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .insert(record.id, record);
    }

    /// Insert many records
    pub fn extend<I>(&self, tenant: &TenantId, collection: &str, records: I)
    where
        I: IntoIterator<Item = ContentRecord>,
    {
        let mut guard = self.collections.write();
        let target = guard
            .entry(tenant.clone())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        for record in records {
            target.insert(record.id, record);
        }
    }

    /// Remove a record, returning it
    pub fn remove(&self, tenant: &TenantId, collection: &str, id: RecordId) -> Option<ContentRecord> {
        self.collections
            .write()
            .get_mut(tenant)
            .and_then(|c| c.get_mut(collection))
            .and_then(|c| c.remove(&id))
    }
}

impl ContentStore for MemoryContentStore {
    fn fetch_after(
        &self,
        tenant: &TenantId,
        collection: &str,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<ContentRecord>, ContentError> {
        let guard = self.collections.read();
        let Some(records) = guard.get(tenant).and_then(|c| c.get(collection)) else {
            return Ok(Vec::new());
        };
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        Ok(records
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn count(&self, tenant: &TenantId, collection: &str) -> Result<u64, ContentError> {
        Ok(self
            .collections
            .read()
            .get(tenant)
            .and_then(|c| c.get(collection))
            .map_or(0, |c| c.len() as u64))
    }

    fn tenants(&self) -> Result<Vec<TenantId>, ContentError> {
        Ok(self
            .collections
            .read()
            .iter()
            .filter(|(_, c)| c.values().any(|records| !records.is_empty()))
            .map(|(t, _)| t.clone())
            .collect())
    }
}
