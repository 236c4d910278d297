//! Record → document mapping
//!
//! Each logical index has one [`DocumentMapper`]. A mapper names the content
//! collection it reads, decides which records belong in its index, and turns
//! them into [`IndexDocument`]s.
//!
//! | Result | Meaning | Effect on the run |
//! |--------|---------|-------------------|
//! | `Ok(Some(doc))` | indexable | flushed to the backend |
//! | `Ok(None)` | excluded (kind, status) | counted as skipped |
//! | `Err(MappingError)` | malformed record | counted as failed, loop continues |

use crate::config::MapperConfig;
use indexsync_core::{ContentRecord, IndexDocument, IndexSelection, RecordId};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// A record that could not be turned into a document
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record {record_id}: {reason}")]
pub struct MappingError {
    /// Offending record
    pub record_id: RecordId,
    /// What was wrong with it
    pub reason: String,
}

impl MappingError {
    fn new(record_id: RecordId, reason: impl Into<String>) -> Self {
        MappingError {
            record_id,
            reason: reason.into(),
        }
    }
}

/// Maps content records of one collection into one logical index
pub trait DocumentMapper: Send + Sync {
    /// Logical index name, also the feature name that toggles it
    fn index_name(&self) -> &str;

    /// Content collection the index is fed from
    fn collection(&self) -> &str;

    /// Index mapping sent to the backend on setup
    fn mapping(&self) -> Value;

    /// Map one record
    fn map(&self, record: &ContentRecord) -> Result<Option<IndexDocument>, MappingError>;
}

// ============================================================================
// Built-in mappers
// ============================================================================

/// Posts and pages
pub struct PostMapper {
    post_types: BTreeSet<String>,
    statuses: BTreeSet<String>,
}

impl PostMapper {
    /// Index name
    pub const NAME: &'static str = "post";

    /// Create from mapper settings
    pub fn new(config: &MapperConfig) -> Self {
        PostMapper {
            post_types: config.post_types.iter().cloned().collect(),
            statuses: config.post_statuses.iter().cloned().collect(),
        }
    }
}

impl Default for PostMapper {
    fn default() -> Self {
        Self::new(&MapperConfig::default())
    }
}

impl DocumentMapper for PostMapper {
    fn index_name(&self) -> &str {
        Self::NAME
    }

    fn collection(&self) -> &str {
        "posts"
    }

    fn mapping(&self) -> Value {
        json!({
            "mappings": {
                "properties": {
                    "post_id": {"type": "long"},
                    "post_type": {"type": "keyword"},
                    "post_status": {"type": "keyword"},
                    "post_title": {"type": "text"},
                    "post_content": {"type": "text"},
                    "post_excerpt": {"type": "text"},
                    "post_author": {"type": "long"},
                    "post_date": {"type": "date", "ignore_malformed": true},
                    "terms": {"type": "keyword"}
                }
            }
        })
    }

    fn map(&self, record: &ContentRecord) -> Result<Option<IndexDocument>, MappingError> {
        if !self.post_types.contains(&record.kind) {
            return Ok(None);
        }
        let status = record.status.as_deref().unwrap_or("publish");
        if !self.statuses.contains(status) {
            return Ok(None);
        }

        let title = match record.fields.get("title") {
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(MappingError::new(record.id, "title is not a string")),
            None => return Err(MappingError::new(record.id, "missing title")),
        };

        let mut fields = Map::new();
        fields.insert("post_id".into(), json!(record.id));
        fields.insert("post_type".into(), json!(record.kind));
        fields.insert("post_status".into(), json!(status));
        fields.insert("post_title".into(), Value::String(title));
        for (source, target) in [
            ("content", "post_content"),
            ("excerpt", "post_excerpt"),
            ("date", "post_date"),
        ] {
            match record.fields.get(source) {
                Some(Value::String(s)) => {
                    fields.insert(target.into(), Value::String(s.clone()));
                }
                Some(Value::Null) | None => {}
                Some(_) => {
                    return Err(MappingError::new(record.id, format!("{} is not a string", source)))
                }
            }
        }
        if let Some(author) = record.fields.get("author").and_then(Value::as_u64) {
            fields.insert("post_author".into(), json!(author));
        }
        if let Some(terms) = record.fields.get("terms") {
            let Some(terms) = terms.as_array() else {
                return Err(MappingError::new(record.id, "terms is not a list"));
            };
            fields.insert("terms".into(), Value::Array(terms.clone()));
        }

        Ok(Some(IndexDocument::new(record.id, Self::NAME, fields)))
    }
}

/// User accounts
#[derive(Default)]
pub struct UserMapper;

impl UserMapper {
    /// Index name
    pub const NAME: &'static str = "user";
}

impl DocumentMapper for UserMapper {
    fn index_name(&self) -> &str {
        Self::NAME
    }

    fn collection(&self) -> &str {
        "users"
    }

    fn mapping(&self) -> Value {
        json!({
            "mappings": {
                "properties": {
                    "user_id": {"type": "long"},
                    "user_login": {"type": "keyword"},
                    "user_email": {"type": "keyword"},
                    "display_name": {"type": "text"},
                    "roles": {"type": "keyword"}
                }
            }
        })
    }

    fn map(&self, record: &ContentRecord) -> Result<Option<IndexDocument>, MappingError> {
        if record.fields.get("deleted").and_then(Value::as_bool) == Some(true) {
            return Ok(None);
        }
        let login = record
            .str_field("login")
            .filter(|l| !l.is_empty())
            .ok_or_else(|| MappingError::new(record.id, "missing login"))?;

        let mut fields = Map::new();
        fields.insert("user_id".into(), json!(record.id));
        fields.insert("user_login".into(), json!(login));
        fields.insert(
            "display_name".into(),
            json!(record.str_field("display_name").unwrap_or(login)),
        );
        if let Some(email) = record.str_field("email") {
            fields.insert("user_email".into(), json!(email));
        }
        if let Some(roles) = record.fields.get("roles").and_then(Value::as_array) {
            fields.insert("roles".into(), Value::Array(roles.clone()));
        }

        Ok(Some(IndexDocument::new(record.id, Self::NAME, fields)))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registered mappers, in run order
#[derive(Clone, Default)]
pub struct MapperSet {
    mappers: Vec<Arc<dyn DocumentMapper>>,
}

impl MapperSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Posts then users
    pub fn builtin(config: &MapperConfig) -> Self {
        MapperSet::new()
            .with(Arc::new(PostMapper::new(config)))
            .with(Arc::new(UserMapper))
    }

    /// Register a mapper; a later mapper with the same name replaces it
    pub fn with(mut self, mapper: Arc<dyn DocumentMapper>) -> Self {
        match self
            .mappers
            .iter()
            .position(|m| m.index_name() == mapper.index_name())
        {
            Some(i) => self.mappers[i] = mapper,
            None => self.mappers.push(mapper),
        }
        self
    }

    /// Look up a mapper by index name
    pub fn get(&self, index_name: &str) -> Option<&Arc<dyn DocumentMapper>> {
        self.mappers.iter().find(|m| m.index_name() == index_name)
    }

    /// Registered index names
    pub fn names(&self) -> Vec<String> {
        self.mappers.iter().map(|m| m.index_name().to_string()).collect()
    }

    /// Every registered mapper
    pub fn all(&self) -> &[Arc<dyn DocumentMapper>] {
        &self.mappers
    }

    /// Mappers a run walks: selected and enabled, in registration order
    pub fn select(&self, selection: &IndexSelection, enabled: &BTreeSet<String>) -> Vec<Arc<dyn DocumentMapper>> {
        self.mappers
            .iter()
            .filter(|m| selection.includes(m.index_name()) && enabled.contains(m.index_name()))
            .cloned()
            .collect()
    }

    /// Number of registered mappers
    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}
