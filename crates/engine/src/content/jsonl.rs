use super::{ContentError, ContentStore};
use indexsync_core::{ContentRecord, RecordId, TenantId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Content store backed by JSON-lines files
///
/// Layout: `<root>/<tenant>/<collection>.jsonl`, one [`ContentRecord`] per
/// line. A later line with an existing id replaces the earlier one. Lines
/// that do not parse, including lines that are not valid UTF-8, are logged,
/// skipped, and reported through [`ContentStore::malformed`].
///
/// Parsed collections are cached and reloaded when the file's size or
/// modification time changes, so external writers may append while a run is
/// in flight.
#[derive(Debug, Clone)]
pub struct JsonlContentStore {
    root: PathBuf,
    cache: Arc<RwLock<HashMap<PathBuf, Arc<Collection>>>>,
}

/// File metadata a cached collection was parsed from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    len: u64,
    modified: Option<SystemTime>,
}

#[derive(Debug, Default)]
struct Collection {
    stamp: Option<Stamp>,
    /// Ascending by id, one record per id
    records: Vec<ContentRecord>,
    malformed: u64,
}

impl Collection {
    fn parse(path: &Path, bytes: &[u8], stamp: Stamp) -> Self {
        let mut records = BTreeMap::new();
        let mut malformed = 0;
        for (lineno, line) in bytes.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<ContentRecord>(line) {
                Ok(record) => {
                    records.insert(record.id, record);
                }
                Err(e) => {
                    malformed += 1;
                    warn!(
                        path = %path.display(),
                        line = lineno + 1,
                        error = %e,
                        "Skipping unreadable content line"
                    );
                }
            }
        }
        Collection {
            stamp: Some(stamp),
            records: records.into_values().collect(),
            malformed,
        }
    }

    fn after(&self, after: Option<RecordId>) -> &[ContentRecord] {
        let start = after.map_or(0, |a| self.records.partition_point(|r| r.id <= a));
        &self.records[start..]
    }
}

impl JsonlContentStore {
    /// Open a store rooted at `root`; the directory need not exist yet
    pub fn new(root: impl Into<PathBuf>) -> Self {
        JsonlContentStore {
            root: root.into(),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_path(&self, tenant: &TenantId, collection: &str) -> PathBuf {
        self.root.join(tenant.as_str()).join(format!("{}.jsonl", collection))
    }

    fn load(&self, tenant: &TenantId, collection: &str) -> Result<Arc<Collection>, ContentError> {
        let path = self.collection_path(tenant, collection);
        let io_err = |source| ContentError::Io {
            tenant: tenant.clone(),
            collection: collection.to_string(),
            source,
        };

        // Metadata is taken before the read: a write racing the read leaves
        // a stamp older than the content, which only forces another reload.
        let stamp = match std::fs::metadata(&path) {
            Ok(meta) => Stamp {
                len: meta.len(),
                modified: meta.modified().ok(),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.cache.write().remove(&path);
                return Ok(Arc::new(Collection::default()));
            }
            Err(e) => return Err(io_err(e)),
        };

        if let Some(cached) = self.cache.read().get(&path) {
            if cached.stamp == Some(stamp) {
                return Ok(Arc::clone(cached));
            }
        }

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(io_err(e)),
        };
        let parsed = Arc::new(Collection::parse(&path, &bytes, stamp));
        debug!(
            path = %path.display(),
            records = parsed.records.len(),
            malformed = parsed.malformed,
            "Loaded content collection"
        );
        self.cache.write().insert(path, Arc::clone(&parsed));
        Ok(parsed)
    }
}

impl ContentStore for JsonlContentStore {
    fn fetch_after(
        &self,
        tenant: &TenantId,
        collection: &str,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<ContentRecord>, ContentError> {
        let loaded = self.load(tenant, collection)?;
        Ok(loaded.after(after).iter().take(limit).cloned().collect())
    }

    fn count(&self, tenant: &TenantId, collection: &str) -> Result<u64, ContentError> {
        Ok(self.load(tenant, collection)?.records.len() as u64)
    }

    fn malformed(&self, tenant: &TenantId, collection: &str) -> Result<u64, ContentError> {
        Ok(self.load(tenant, collection)?.malformed)
    }

    fn tenants(&self) -> Result<Vec<TenantId>, ContentError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ContentError::Unavailable(format!("{}: {}", self.root.display(), e))),
        };

        let mut tenants = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ContentError::Unavailable(e.to_string()))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                let tenant = TenantId::new(name);
                if tenant.is_valid() && !tenant.is_network() {
                    tenants.push(tenant);
                }
            }
        }
        tenants.sort();
        Ok(tenants)
    }
}
