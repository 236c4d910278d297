//! Main entry point for indexsync.
//!
//! This module provides the `IndexSync` struct, the facade every trigger
//! source (CLI, dashboard, scheduler) drives.

use crate::error::{Error, Result};
use indexsync_core::{ProgressSnapshot, SyncOptions, TenantId, TriggerSource};
use indexsync_engine::{
    backend, BulkIndexClient, ContentStore, DocumentMapper, IndexHealth, JsonlContentStore,
    MapperSet, MemoryContentStore, RetryPolicy, SearchBackend, SyncConfig, SyncCoordinator,
    SyncHandle,
};
use indexsync_storage::{DurabilityMode, FileStore, FileStoreOptions, ShardedStore, StateStore};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// The sync engine of one deployment.
///
/// Create one with [`IndexSync::open`], [`IndexSync::ephemeral`] or
/// [`IndexSync::builder`]. Handles are cheap to clone; every clone drives
/// the same run state.
///
/// # Example
///
/// ```ignore
/// use indexsync::prelude::*;
///
/// let sync = IndexSync::open("./indexsync.toml")?;
/// let tenant = TenantId::new("1");
///
/// let handle = sync.start(&tenant, TriggerSource::Cli, &SyncOptions::new())?;
/// println!("{}", sync.status(&tenant)?.message());
/// handle.wait()?;
/// ```
#[derive(Clone)]
pub struct IndexSync {
    coordinator: SyncCoordinator,
    ephemeral: bool,
}

impl IndexSync {
    /// Open the deployment described by a TOML config file.
    ///
    /// Run state lives in a [`FileStore`] under `data_dir`, content is read
    /// from JSONL files under `content_dir`. Relative directories are taken
    /// relative to the config file.
    pub fn open(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.as_ref();
        let mut config = SyncConfig::load(config_path)?;
        if let Some(base) = config_path.parent() {
            config.data_dir = relative_to(base, &config.data_dir);
            config.content_dir = relative_to(base, &config.content_dir);
        }
        Self::builder().config(config).open()
    }

    /// Create an engine with no disk I/O.
    ///
    /// Run state and content live in memory and are lost when dropped.
    /// Content is empty; use [`IndexSyncBuilder::content`] to provide some.
    ///
    /// # Comparison
    ///
    /// | Method | Run state | Content |
    /// |--------|-----------|---------|
    /// | `IndexSync::ephemeral()` | Memory | Memory |
    /// | `IndexSync::open(path)` | `data_dir` | `content_dir` |
    pub fn ephemeral() -> Result<Self> {
        Self::builder().ephemeral()
    }

    /// Create a builder for engine configuration.
    pub fn builder() -> IndexSyncBuilder {
        IndexSyncBuilder::new()
    }

    /// Engine configuration
    pub fn config(&self) -> &SyncConfig {
        self.coordinator.config()
    }

    /// Check if run state is kept in memory only.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Underlying coordinator
    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    /// Logical index names, in run order
    pub fn index_names(&self) -> Vec<String> {
        self.coordinator.mappers().names()
    }

    // ========================================================================
    // Run control
    // ========================================================================

    /// Start a run; refused with [`Error::Busy`] while another run holds
    /// the tenant's lock.
    pub fn start(&self, tenant: &TenantId, trigger: TriggerSource, options: &SyncOptions) -> Result<SyncHandle> {
        self.coordinator.start(tenant, trigger, options).map_err(Error::from)
    }

    /// Pause the tenant's run at its next batch boundary
    pub fn pause(&self, tenant: &TenantId) -> Result<ProgressSnapshot> {
        self.coordinator.pause(tenant).map_err(Error::from)
    }

    /// Resume the tenant's paused run
    pub fn resume(&self, tenant: &TenantId, trigger: TriggerSource) -> Result<SyncHandle> {
        self.coordinator.resume(tenant, trigger).map_err(Error::from)
    }

    /// Cancel the tenant's running or paused run
    pub fn cancel(&self, tenant: &TenantId) -> Result<ProgressSnapshot> {
        self.coordinator.cancel(tenant).map_err(Error::from)
    }

    /// Current progress of the tenant
    pub fn status(&self, tenant: &TenantId) -> Result<ProgressSnapshot> {
        self.coordinator.status(tenant).map_err(Error::from)
    }

    // ========================================================================
    // Index maintenance
    // ========================================================================

    /// Delete the tenant's indices (or every site's, when `network_wide`)
    pub fn delete_index(&self, tenant: &TenantId, network_wide: bool) -> Result<Vec<String>> {
        self.coordinator.delete_index(tenant, network_wide).map_err(Error::from)
    }

    /// Document counts of the tenant's indices
    pub fn health(&self, tenant: &TenantId) -> Result<Vec<IndexHealth>> {
        self.coordinator.health(tenant).map_err(Error::from)
    }

    /// Enabled indices of the tenant
    pub fn features(&self, tenant: &TenantId) -> Result<BTreeSet<String>> {
        self.coordinator.features(tenant).map_err(Error::from)
    }

    /// Enable or disable one of the tenant's indices
    pub fn set_feature(&self, tenant: &TenantId, name: &str, enabled: bool) -> Result<BTreeSet<String>> {
        self.coordinator.set_feature(tenant, name, enabled).map_err(Error::from)
    }
}

/// Builder for engine configuration.
///
/// # Example
///
/// ```ignore
/// // Production: durable run state, Elasticsearch from the config
/// let sync = IndexSync::builder()
///     .config(SyncConfig::load("indexsync.toml")?)
///     .open()?;
///
/// // Testing: everything in memory
/// let content = Arc::new(MemoryContentStore::new());
/// let sync = IndexSync::builder()
///     .content(content.clone())
///     .backend(Arc::new(MemoryBackend::new()))
///     .ephemeral()?;
/// ```
pub struct IndexSyncBuilder {
    config: SyncConfig,
    state: Option<Arc<dyn StateStore>>,
    content: Option<Arc<dyn ContentStore>>,
    backend: Option<Arc<dyn SearchBackend>>,
    mappers: Vec<Arc<dyn DocumentMapper>>,
    buffered: bool,
}

impl IndexSyncBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        IndexSyncBuilder {
            config: SyncConfig::default(),
            state: None,
            content: None,
            backend: None,
            mappers: Vec::new(),
            buffered: false,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the directory of the durable run state.
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the records pulled per batch.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    /// Use a specific state store instead of the one derived from the config.
    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state = Some(store);
        self
    }

    /// Use a specific content store instead of the JSONL directory.
    pub fn content(mut self, content: Arc<dyn ContentStore>) -> Self {
        self.content = Some(content);
        self
    }

    /// Use a specific search backend instead of the configured one.
    pub fn backend(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Register an additional mapper, replacing a built-in one of the same
    /// index name.
    pub fn mapper(mut self, mapper: Arc<dyn DocumentMapper>) -> Self {
        self.mappers.push(mapper);
        self
    }

    /// Skip fsync on run state writes.
    ///
    /// A crash may lose the last checkpoint, in which case the run redoes
    /// its last batches on resume.
    pub fn buffered(mut self) -> Self {
        self.buffered = true;
        self
    }

    /// Open with durable run state under `data_dir`.
    pub fn open(mut self) -> Result<IndexSync> {
        self.config.validate()?;
        let state: Arc<dyn StateStore> = match self.state.take() {
            Some(state) => state,
            None => {
                let options = FileStoreOptions {
                    durability: if self.buffered {
                        DurabilityMode::Buffered
                    } else {
                        DurabilityMode::Strict
                    },
                    ..FileStoreOptions::default()
                };
                Arc::new(FileStore::open_with(&self.config.data_dir, options)?)
            }
        };
        let content: Arc<dyn ContentStore> = match self.content.take() {
            Some(content) => content,
            None => Arc::new(JsonlContentStore::new(self.config.content_dir.clone())),
        };
        Ok(self.assemble(state, content, false))
    }

    /// Open with run state in memory.
    pub fn ephemeral(mut self) -> Result<IndexSync> {
        self.config.validate()?;
        let state: Arc<dyn StateStore> = match self.state.take() {
            Some(state) => state,
            None => Arc::new(ShardedStore::new()),
        };
        let content: Arc<dyn ContentStore> = match self.content.take() {
            Some(content) => content,
            None => Arc::new(MemoryContentStore::new()),
        };
        Ok(self.assemble(state, content, true))
    }

    fn assemble(self, state: Arc<dyn StateStore>, content: Arc<dyn ContentStore>, ephemeral: bool) -> IndexSync {
        let backend = match self.backend {
            Some(backend) => backend,
            None => backend::from_config(&self.config.backend),
        };
        let bulk = BulkIndexClient::new(
            backend,
            self.config.max_bulk_documents,
            RetryPolicy::from(&self.config.retry),
        );
        let mut mappers = MapperSet::builtin(&self.config.mappers);
        for mapper in self.mappers {
            mappers = mappers.with(mapper);
        }
        debug!(
            ephemeral,
            indices = mappers.len(),
            backend = ?self.config.backend.kind,
            "Assembled sync engine"
        );
        IndexSync {
            coordinator: SyncCoordinator::new(self.config, state, content, bulk, mappers),
            ephemeral,
        }
    }
}

impl Default for IndexSyncBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn relative_to(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
