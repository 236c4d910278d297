//! Shared fixtures for the integration suites.
//!
//! - [`GatedBackend`]: memory backend whose bulk calls can be held at a gate,
//!   rejected per id, or failed transiently
//! - [`FlakyStore`]: state store whose checkpoint writes can be made to fail
//! - [`TestSync`]: an in-memory engine wired to both

#![allow(dead_code)]

pub use indexsync::prelude::{
    Error, IndexSelection, IndexSync, ProgressSnapshot, RunExit, SyncConfig, SyncHandle, SyncOptions,
    SyncStatus, TenantId, TriggerSource,
};
pub use indexsync::{ContentRecord, MemoryBackend, MemoryContentStore, BUSY_MESSAGE, SYNC_COMPLETE, SYNC_PAUSED};
pub use indexsync_core::{DocumentOutcome, IndexDocument, RecordId, Version};
pub use indexsync_engine::{BackendError, RetryConfig, SearchBackend, CHECKPOINT_KEY};
pub use indexsync_storage::{ShardedStore, StateStore, StorageError, StorageResult, Versioned};

use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on any wait in the suites
pub const WAIT_LIMIT: Duration = Duration::from_secs(10);

// ============================================================================
// GatedBackend
// ============================================================================

/// Memory backend with a gate in front of `bulk_index`
///
/// The gate holds a number of permits; `None` means unlimited. A bulk call
/// is counted as soon as it arrives, then waits for a permit.
pub struct GatedBackend {
    inner: MemoryBackend,
    permits: Mutex<Option<usize>>,
    changed: Condvar,
    calls: AtomicUsize,
    transient_failures: AtomicUsize,
    rejected: Mutex<BTreeSet<RecordId>>,
}

impl GatedBackend {
    pub fn new() -> Self {
        GatedBackend {
            inner: MemoryBackend::new(),
            permits: Mutex::new(None),
            changed: Condvar::new(),
            calls: AtomicUsize::new(0),
            transient_failures: AtomicUsize::new(0),
            rejected: Mutex::new(BTreeSet::new()),
        }
    }

    /// Hold every bulk call from now on
    pub fn close(&self) {
        *self.permits.lock() = Some(0);
    }

    /// Let `n` more bulk calls through
    pub fn allow(&self, n: usize) {
        let mut permits = self.permits.lock();
        *permits = Some(permits.unwrap_or(0) + n);
        self.changed.notify_all();
    }

    /// Let every bulk call through
    pub fn open(&self) {
        *self.permits.lock() = None;
        self.changed.notify_all();
    }

    /// Bulk calls seen so far, including held ones
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Block until at least `n` bulk calls have arrived
    pub fn wait_for_calls(&self, n: usize) {
        wait_until(|| self.calls() >= n, &format!("{} bulk calls", n));
    }

    /// Fail the next `n` bulk requests with a transient error
    pub fn fail_transiently(&self, n: usize) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Reject a document id in every bulk request
    pub fn reject(&self, id: RecordId) {
        self.rejected.lock().insert(id);
    }

    /// Document ids of a physical index
    pub fn ids(&self, index: &str) -> Vec<RecordId> {
        self.inner.ids(index)
    }

    /// Physical indices that exist
    pub fn index_names(&self) -> Vec<String> {
        self.inner.index_names()
    }

    /// Store documents directly, bypassing the gate
    pub fn seed(&self, index: &str, documents: &[IndexDocument]) {
        self.inner.bulk_index(index, documents).unwrap();
    }

    fn pass_gate(&self) {
        let mut permits = self.permits.lock();
        loop {
            match *permits {
                None => return,
                Some(n) if n > 0 => {
                    *permits = Some(n - 1);
                    return;
                }
                Some(_) => self.changed.wait(&mut permits),
            }
        }
    }
}

impl SearchBackend for GatedBackend {
    fn bulk_index(&self, index: &str, documents: &[IndexDocument]) -> Result<Vec<DocumentOutcome>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate();

        let failing = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BackendError::Transient("503 Service Unavailable".into()));
        }

        let rejected = self.rejected.lock().clone();
        let accepted: Vec<IndexDocument> = documents
            .iter()
            .filter(|d| !rejected.contains(&d.id))
            .cloned()
            .collect();
        self.inner.bulk_index(index, &accepted)?;
        Ok(documents
            .iter()
            .map(|d| {
                if rejected.contains(&d.id) {
                    DocumentOutcome::Rejected("mapper_parsing_exception: failed to parse".into())
                } else {
                    DocumentOutcome::Indexed
                }
            })
            .collect())
    }

    fn create_index(&self, index: &str, mapping: &Value) -> Result<(), BackendError> {
        self.inner.create_index(index, mapping)
    }

    fn delete_index(&self, index: &str) -> Result<(), BackendError> {
        self.inner.delete_index(index)
    }

    fn document_count(&self, index: &str) -> Result<Option<u64>, BackendError> {
        self.inner.document_count(index)
    }
}

// ============================================================================
// FlakyStore
// ============================================================================

/// In-memory state store whose checkpoint writes can be made to fail
pub struct FlakyStore {
    inner: ShardedStore,
    fail_checkpoints: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        FlakyStore {
            inner: ShardedStore::new(),
            fail_checkpoints: AtomicBool::new(false),
        }
    }

    /// Make checkpoint writes fail (or succeed again)
    pub fn fail_checkpoint_writes(&self, fail: bool) {
        self.fail_checkpoints.store(fail, Ordering::SeqCst);
    }
}

impl StateStore for FlakyStore {
    fn get(&self, tenant: &TenantId, key: &str) -> StorageResult<Option<Versioned>> {
        self.inner.get(tenant, key)
    }

    fn compare_and_swap(
        &self,
        tenant: &TenantId,
        key: &str,
        expected: Option<Version>,
        value: Option<Vec<u8>>,
    ) -> StorageResult<Option<Version>> {
        if key == CHECKPOINT_KEY && self.fail_checkpoints.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no space left on device",
            )));
        }
        self.inner.compare_and_swap(tenant, key, expected, value)
    }

    fn tenants(&self) -> StorageResult<Vec<TenantId>> {
        self.inner.tenants()
    }
}

// ============================================================================
// TestSync
// ============================================================================

/// Engine config for tests: batches of 4, fast retries
pub fn test_config() -> SyncConfig {
    SyncConfig {
        batch_size: 4,
        retry: RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            multiplier: 2.0,
            jitter: false,
        },
        ..SyncConfig::default()
    }
}

/// A published post
pub fn post(id: RecordId) -> ContentRecord {
    ContentRecord::new(id, "post")
        .with_status("publish")
        .with_field("title", format!("Post {}", id))
        .with_field("content", format!("Body of post {}", id))
}

/// A user
pub fn user(id: RecordId) -> ContentRecord {
    ContentRecord::new(id, "user").with_field("login", format!("user{}", id))
}

/// In-memory engine with test doubles
pub struct TestSync {
    pub sync: IndexSync,
    pub content: Arc<MemoryContentStore>,
    pub backend: Arc<GatedBackend>,
    pub store: Arc<FlakyStore>,
    pub tenant: TenantId,
}

impl TestSync {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let content = Arc::new(MemoryContentStore::new());
        let backend = Arc::new(GatedBackend::new());
        let store = Arc::new(FlakyStore::new());
        let sync = Self::engine(config, &content, &backend, &store);
        TestSync {
            sync,
            content,
            backend,
            store,
            tenant: TenantId::new("1"),
        }
    }

    /// Another engine over the same stores, as a second process would see them
    pub fn peer(&self) -> IndexSync {
        Self::engine(self.sync.config().clone(), &self.content, &self.backend, &self.store)
    }

    fn engine(
        config: SyncConfig,
        content: &Arc<MemoryContentStore>,
        backend: &Arc<GatedBackend>,
        store: &Arc<FlakyStore>,
    ) -> IndexSync {
        IndexSync::builder()
            .config(config)
            .state_store(store.clone())
            .content(content.clone())
            .backend(backend.clone())
            .ephemeral()
            .unwrap()
    }

    /// Add posts `ids` to a tenant
    pub fn posts(&self, tenant: &TenantId, ids: impl IntoIterator<Item = RecordId>) {
        self.content.extend(tenant, "posts", ids.into_iter().map(post));
    }

    /// Add users `ids` to a tenant
    pub fn users(&self, tenant: &TenantId, ids: impl IntoIterator<Item = RecordId>) {
        self.content.extend(tenant, "users", ids.into_iter().map(user));
    }

    /// Indexed post ids of a tenant
    pub fn post_ids(&self, tenant: &TenantId) -> Vec<RecordId> {
        self.backend.ids(&format!("indexsync-post-{}", tenant))
    }

    /// Indexed user ids of a tenant
    pub fn user_ids(&self, tenant: &TenantId) -> Vec<RecordId> {
        self.backend.ids(&format!("indexsync-user-{}", tenant))
    }

    /// Start a default run on the default tenant
    pub fn start(&self, trigger: TriggerSource) -> SyncHandle {
        self.sync
            .start(&self.tenant, trigger, &SyncOptions::new())
            .expect("start")
    }

    /// Status of the default tenant
    pub fn status(&self) -> ProgressSnapshot {
        self.sync.status(&self.tenant).expect("status")
    }

    /// Start a run and stop it paused after its first batch
    pub fn start_paused_after_first_batch(&self, trigger: TriggerSource) -> SyncHandle {
        self.backend.close();
        let handle = self.start(trigger);
        self.backend.wait_for_calls(1);
        let snapshot = self.sync.pause(&self.tenant).expect("pause");
        assert_eq!(snapshot.status, SyncStatus::Paused);
        self.backend.open();
        handle
    }
}

/// Poll until `cond` holds; panics after [`WAIT_LIMIT`]
pub fn wait_until(mut cond: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + WAIT_LIMIT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(2));
    }
}
