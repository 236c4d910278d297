//! Bulk indexing with chunking and retry
//!
//! A flush never fails as a whole: every document ends up either in
//! `succeeded_ids` or in `failed`. Chunks are retried only on
//! [`BackendError::Transient`]; a chunk that exhausts its attempts, or hits a
//! fatal error, marks all of its documents failed. Per-document rejections
//! are reported as-is and never retried.

use crate::backend::{BackendError, SearchBackend};
use crate::config::RetryConfig;
use indexsync_core::{BulkResult, DocumentFailure, DocumentOutcome, IndexDocument};
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Exponential backoff schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on any delay
    pub max_backoff: Duration,
    /// Growth factor
    pub multiplier: f64,
    /// Randomize each delay within `[delay / 2, delay]`
    pub jitter: bool,
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.multiplier.powi(retry.saturating_sub(1).min(i32::MAX as u32) as i32);
        let base = self.initial_backoff.as_millis() as f64 * exp;
        let capped = base.min(self.max_backoff.as_millis() as f64);
        let delay = if self.jitter && capped > 0.0 {
            rand::thread_rng().gen_range(capped / 2.0..=capped)
        } else {
            capped
        };
        Duration::from_millis(delay.max(0.0).round() as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }
}

/// Client that ships documents to a [`SearchBackend`]
#[derive(Clone)]
pub struct BulkIndexClient {
    backend: Arc<dyn SearchBackend>,
    max_bulk_documents: usize,
    retry: RetryPolicy,
}

impl BulkIndexClient {
    /// Create a client
    pub fn new(backend: Arc<dyn SearchBackend>, max_bulk_documents: usize, retry: RetryPolicy) -> Self {
        BulkIndexClient {
            backend,
            max_bulk_documents: max_bulk_documents.max(1),
            retry,
        }
    }

    /// Underlying backend
    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    /// Index documents into a physical index
    pub fn flush(&self, index: &str, documents: &[IndexDocument]) -> BulkResult {
        let mut result = BulkResult::default();
        for chunk in documents.chunks(self.max_bulk_documents) {
            result.merge(self.flush_chunk(index, chunk));
        }
        result
    }

    fn flush_chunk(&self, index: &str, chunk: &[IndexDocument]) -> BulkResult {
        match self.with_retry("bulk", || self.backend.bulk_index(index, chunk)) {
            Ok(outcomes) => {
                let mut result = BulkResult::default();
                for (i, doc) in chunk.iter().enumerate() {
                    match outcomes.get(i) {
                        Some(DocumentOutcome::Indexed) => result.succeeded_ids.push(doc.id),
                        Some(DocumentOutcome::Rejected(reason)) => result.failed.push(DocumentFailure {
                            id: doc.id,
                            reason: reason.clone(),
                        }),
                        None => result.failed.push(DocumentFailure {
                            id: doc.id,
                            reason: "no outcome reported by backend".to_string(),
                        }),
                    }
                }
                result
            }
            Err(e) => {
                warn!(index, documents = chunk.len(), error = %e, "Bulk chunk failed");
                BulkResult {
                    succeeded_ids: Vec::new(),
                    failed: chunk
                        .iter()
                        .map(|doc| DocumentFailure {
                            id: doc.id,
                            reason: e.to_string(),
                        })
                        .collect(),
                }
            }
        }
    }

    /// Delete and recreate an index
    pub fn setup_index(&self, index: &str, mapping: &Value) -> Result<(), BackendError> {
        self.with_retry("delete_index", || self.backend.delete_index(index))?;
        self.with_retry("create_index", || self.backend.create_index(index, mapping))
    }

    /// Delete an index
    pub fn delete_index(&self, index: &str) -> Result<(), BackendError> {
        self.with_retry("delete_index", || self.backend.delete_index(index))
    }

    /// Documents in an index, `None` if it does not exist
    pub fn document_count(&self, index: &str) -> Result<Option<u64>, BackendError> {
        self.with_retry("document_count", || self.backend.document_count(index))
    }

    fn with_retry<T, F>(&self, op: &str, mut f: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Result<T, BackendError>,
    {
        let mut attempt = 1;
        loop {
            match f() {
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    debug!(op, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
