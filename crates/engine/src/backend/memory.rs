use super::{BackendError, SearchBackend};
use dashmap::DashMap;
use indexsync_core::{DocumentOutcome, IndexDocument, RecordId};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct MemoryIndex {
    mapping: Value,
    documents: BTreeMap<RecordId, Map<String, Value>>,
}

/// In-process search backend
///
/// Indices are created on first write, like an HTTP backend with automatic
/// index creation. Every document is accepted.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    indices: DashMap<String, MemoryIndex>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids stored in an index, ascending
    pub fn ids(&self, index: &str) -> Vec<RecordId> {
        self.indices
            .get(index)
            .map(|i| i.documents.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Stored fields of one document
    pub fn document(&self, index: &str, id: RecordId) -> Option<Map<String, Value>> {
        self.indices.get(index).and_then(|i| i.documents.get(&id).cloned())
    }

    /// Mapping an index was created with
    pub fn mapping(&self, index: &str) -> Option<Value> {
        self.indices.get(index).map(|i| i.mapping.clone())
    }

    /// Names of existing indices
    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indices.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl SearchBackend for MemoryBackend {
    fn bulk_index(&self, index: &str, documents: &[IndexDocument]) -> Result<Vec<DocumentOutcome>, BackendError> {
        let mut target = self.indices.entry(index.to_string()).or_default();
        Ok(documents
            .iter()
            .map(|doc| {
                target.documents.insert(doc.id, doc.fields.clone());
                DocumentOutcome::Indexed
            })
            .collect())
    }

    fn create_index(&self, index: &str, mapping: &Value) -> Result<(), BackendError> {
        self.indices.insert(
            index.to_string(),
            MemoryIndex {
                mapping: mapping.clone(),
                documents: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn delete_index(&self, index: &str) -> Result<(), BackendError> {
        self.indices.remove(index);
        Ok(())
    }

    fn document_count(&self, index: &str) -> Result<Option<u64>, BackendError> {
        Ok(self.indices.get(index).map(|i| i.documents.len() as u64))
    }
}
