//! Elasticsearch-compatible HTTP backend
//!
//! Uses the `_bulk` endpoint with one `index` action per document, keyed by
//! the document id. Status mapping:
//!
//! | Response | Result |
//! |----------|--------|
//! | transport error, timeout | `Transient` |
//! | HTTP 429, 502, 503, 504 | `Transient` |
//! | other HTTP error | `Fatal` |
//! | per-item 429 | whole request `Transient` |
//! | other per-item error | `Rejected` for that document |

use super::{BackendError, SearchBackend};
use indexsync_core::{DocumentOutcome, IndexDocument};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// HTTP search backend
pub struct ElasticsearchBackend {
    base_url: String,
    agent: ureq::Agent,
}

impl ElasticsearchBackend {
    /// Create a backend for `base_url`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        ElasticsearchBackend { base_url, agent }
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

/// NDJSON body of a bulk request
pub(crate) fn bulk_body(index: &str, documents: &[IndexDocument]) -> Result<String, BackendError> {
    let mut body = String::new();
    for doc in documents {
        let action = json!({"index": {"_index": index, "_id": doc.id.to_string()}});
        body.push_str(&action.to_string());
        body.push('\n');
        let source = serde_json::to_string(&doc.fields)
            .map_err(|e| BackendError::Fatal(format!("cannot encode document {}: {}", doc.id, e)))?;
        body.push_str(&source);
        body.push('\n');
    }
    Ok(body)
}

/// Per-document outcomes of a bulk response
pub(crate) fn parse_bulk_response(response: &Value, expected: usize) -> Result<Vec<DocumentOutcome>, BackendError> {
    let items = response
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::Fatal("bulk response has no items".to_string()))?;
    if items.len() != expected {
        return Err(BackendError::Fatal(format!(
            "bulk response has {} items for {} documents",
            items.len(),
            expected
        )));
    }

    let mut outcomes = Vec::with_capacity(items.len());
    for item in items {
        let result = item
            .get("index")
            .ok_or_else(|| BackendError::Fatal("bulk item is not an index action".to_string()))?;
        let status = result.get("status").and_then(Value::as_u64).unwrap_or(0);
        if status == 429 {
            return Err(BackendError::Transient("bulk item throttled (429)".to_string()));
        }
        if (200..300).contains(&status) {
            outcomes.push(DocumentOutcome::Indexed);
        } else {
            let reason = result
                .get("error")
                .map(|e| match (e.get("type").and_then(Value::as_str), e.get("reason").and_then(Value::as_str)) {
                    (Some(t), Some(r)) => format!("{}: {}", t, r),
                    (Some(t), None) => t.to_string(),
                    _ => e.to_string(),
                })
                .unwrap_or_else(|| format!("status {}", status));
            outcomes.push(DocumentOutcome::Rejected(reason));
        }
    }
    Ok(outcomes)
}

fn classify(err: ureq::Error) -> BackendError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            let message = format!("HTTP {}: {}", code, body);
            if matches!(code, 429 | 502 | 503 | 504) {
                BackendError::Transient(message)
            } else {
                BackendError::Fatal(message)
            }
        }
        ureq::Error::Transport(t) => BackendError::Transient(t.to_string()),
    }
}

impl SearchBackend for ElasticsearchBackend {
    fn bulk_index(&self, index: &str, documents: &[IndexDocument]) -> Result<Vec<DocumentOutcome>, BackendError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let body = bulk_body(index, documents)?;
        debug!(index, documents = documents.len(), "Sending bulk request");

        let response: Value = self
            .agent
            .post(&self.url("_bulk"))
            .set("Content-Type", "application/x-ndjson")
            .send_string(&body)
            .map_err(classify)?
            .into_json()
            .map_err(|e| BackendError::Transient(format!("unreadable bulk response: {}", e)))?;

        parse_bulk_response(&response, documents.len())
    }

    fn create_index(&self, index: &str, mapping: &Value) -> Result<(), BackendError> {
        match self.agent.put(&self.url(index)).send_json(mapping.clone()) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(400, response)) => {
                let body = response.into_string().unwrap_or_default();
                if body.contains("resource_already_exists_exception") {
                    Ok(())
                } else {
                    Err(BackendError::Fatal(format!("HTTP 400: {}", body)))
                }
            }
            Err(e) => Err(classify(e)),
        }
    }

    fn delete_index(&self, index: &str) -> Result<(), BackendError> {
        match self.agent.delete(&self.url(index)).call() {
            Ok(_) | Err(ureq::Error::Status(404, _)) => Ok(()),
            Err(e) => Err(classify(e)),
        }
    }

    fn document_count(&self, index: &str) -> Result<Option<u64>, BackendError> {
        match self.agent.get(&self.url(&format!("{}/_count", index))).call() {
            Ok(response) => {
                let body: Value = response
                    .into_json()
                    .map_err(|e| BackendError::Transient(format!("unreadable count response: {}", e)))?;
                body.get("count")
                    .and_then(Value::as_u64)
                    .map(Some)
                    .ok_or_else(|| BackendError::Fatal("count response has no count".to_string()))
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(e) => Err(classify(e)),
        }
    }
}
