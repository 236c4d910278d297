//! Content records, index documents and bulk outcomes

use crate::types::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A raw record read from the content store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Strictly increasing id within a (tenant, kind)
    pub id: RecordId,
    /// Content kind, e.g. `post`, `page`, `user`
    pub kind: String,
    /// Publication status, if the kind has one
    #[serde(default)]
    pub status: Option<String>,
    /// Arbitrary record fields
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl ContentRecord {
    /// Create a record with no status and no fields
    pub fn new(id: RecordId, kind: impl Into<String>) -> Self {
        ContentRecord {
            id,
            kind: kind.into(),
            status: None,
            fields: Map::new(),
        }
    }

    /// Builder-style status setter
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Builder-style field setter
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Look up a string field
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// A document ready to be shipped to the search backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    /// Document id, equal to the source record id
    pub id: RecordId,
    /// Logical index the document routes to
    pub index_name: String,
    /// Indexed fields
    pub fields: Map<String, Value>,
}

impl IndexDocument {
    /// Create a document
    pub fn new(id: RecordId, index_name: impl Into<String>, fields: Map<String, Value>) -> Self {
        IndexDocument {
            id,
            index_name: index_name.into(),
            fields,
        }
    }
}

/// Ordered records returned by one cursor call
///
/// An empty batch signals that the cursor is exhausted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    /// Records ordered by ascending id
    pub records: Vec<ContentRecord>,
}

impl Batch {
    /// Wrap records
    pub fn new(records: Vec<ContentRecord>) -> Self {
        Batch { records }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the cursor is exhausted
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Id of the last record, the next resume position
    pub fn last_id(&self) -> Option<RecordId> {
        self.records.last().map(|r| r.id)
    }
}

/// Per-document outcome reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentOutcome {
    /// Document stored (created or replaced)
    Indexed,
    /// Document refused; never retried
    Rejected(String),
}

/// A document that did not make it into the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFailure {
    /// Document id
    pub id: RecordId,
    /// Failure reason
    pub reason: String,
}

/// Result of flushing a set of documents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResult {
    /// Ids the backend accepted
    pub succeeded_ids: Vec<RecordId>,
    /// Ids the backend rejected or never accepted
    pub failed: Vec<DocumentFailure>,
}

impl BulkResult {
    /// Fold another result into this one
    pub fn merge(&mut self, other: BulkResult) {
        self.succeeded_ids.extend(other.succeeded_ids);
        self.failed.extend(other.failed);
    }

    /// Check if every document was accepted
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
