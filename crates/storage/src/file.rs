//! Durable file-backed state store
//!
//! Layout:
//!
//! ```text
//! <root>/
//!   <tenant>/
//!     .lock            cross-process mutex, exists only during a CAS
//!     run_lock.rec     one record file per key (see `format`)
//!     checkpoint.rec
//! ```
//!
//! ## Atomicity
//!
//! A compare-and-swap runs under two locks: an in-process mutex, then the
//! tenant's `.lock` file created with `create_new` (atomic on every
//! filesystem we target). Inside the critical section the current record is
//! read, its version compared, and the new record written to a temp file
//! that is renamed over the old one. Readers never take the lock: rename is
//! atomic, so a reader sees either the old or the new record.
//!
//! A `.lock` file older than `stale_lock_after` belongs to a process that
//! died inside a CAS. It is reclaimed by renaming it to a name unique to the
//! reclaimer, so of several processes that saw the same stale file only one
//! claims it. A claimed file that turns out to be fresh was a live lock
//! created after the staleness check and is linked back in place.

use crate::error::{StorageError, StorageResult};
use crate::format::{decode_record, encode_record, StoredRecord};
use crate::traits::{StateStore, Versioned};
use indexsync_core::{TenantId, Version};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

const RECORD_EXT: &str = "rec";
const LOCK_FILE: &str = ".lock";

/// Durability mode for record writes
///
/// | Mode | fsync | Use Case |
/// |------|-------|----------|
/// | Strict | file and directory on every write | Production |
/// | Buffered | never | Tests, throwaway state |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// fsync the record and its directory on every write
    #[default]
    Strict,
    /// Leave flushing to the OS
    Buffered,
}

/// Options of a [`FileStore`]
#[derive(Debug, Clone)]
pub struct FileStoreOptions {
    /// Durability of record writes
    pub durability: DurabilityMode,
    /// How long a CAS waits for the tenant lock file
    pub lock_timeout: Duration,
    /// Age after which a lock file is considered abandoned
    pub stale_lock_after: Duration,
}

impl Default for FileStoreOptions {
    fn default() -> Self {
        FileStoreOptions {
            durability: DurabilityMode::Strict,
            lock_timeout: Duration::from_secs(5),
            stale_lock_after: Duration::from_secs(30),
        }
    }
}

/// State store persisted as one file per record
///
/// Safe to share between threads and between processes pointing at the same
/// root directory.
pub struct FileStore {
    root: PathBuf,
    options: FileStoreOptions,
    local: Mutex<()>,
    tmp_seq: AtomicU64,
}

impl FileStore {
    /// Open (creating if needed) a store at the given directory
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open_with(root, FileStoreOptions::default())
    }

    /// Open with explicit options
    pub fn open_with(root: impl AsRef<Path>, options: FileStoreOptions) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), durability = ?options.durability, "opened file store");
        Ok(FileStore {
            root,
            options,
            local: Mutex::new(()),
            tmp_seq: AtomicU64::new(0),
        })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tenant_dir(&self, tenant: &TenantId) -> StorageResult<PathBuf> {
        if !tenant.is_valid() {
            return Err(StorageError::InvalidName(format!("tenant {:?}", tenant.as_str())));
        }
        Ok(self.root.join(tenant.as_str()))
    }

    fn record_path(dir: &Path, key: &str) -> StorageResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidName(format!("key {:?}", key)));
        }
        Ok(dir.join(format!("{}.{}", key, RECORD_EXT)))
    }

    fn read_record(path: &Path, label: &str) -> StorageResult<Option<StoredRecord>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decode_record(&bytes)
            .map(Some)
            .map_err(|e| StorageError::Corruption {
                key: label.to_string(),
                reason: e.to_string(),
            })
    }

    fn write_record(&self, dir: &Path, path: &Path, record: &StoredRecord) -> StorageResult<()> {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(format!(".tmp-{}-{}", std::process::id(), seq));

        let result = (|| -> StorageResult<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&encode_record(record))?;
            if self.options.durability == DurabilityMode::Strict {
                file.sync_all()?;
            }
            fs::rename(&tmp, path)?;
            if self.options.durability == DurabilityMode::Strict {
                sync_dir(dir)?;
            }
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn lock_dir(&self, dir: &Path) -> StorageResult<DirLock> {
        let path = dir.join(LOCK_FILE);
        let deadline = Instant::now() + self.options.lock_timeout;
        let mut backoff = Duration::from_micros(200);

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(DirLock { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.lock_is_stale(&path) {
                        self.reclaim(&path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(StorageError::LockTimeout(path.display().to_string()));
                    }
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(Duration::from_millis(20));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Take an abandoned lock file out of the way
    fn reclaim(&self, path: &Path) {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let claimed = path.with_file_name(format!("{}.stale-{}-{}", LOCK_FILE, std::process::id(), seq));

        if let Err(e) = fs::rename(path, &claimed) {
            // Another process reclaimed it first
            debug!(lock = %path.display(), error = %e, "stale store lock already taken");
            return;
        }

        if self.lock_is_stale(&claimed) {
            warn!(lock = %path.display(), "removing abandoned store lock");
        } else {
            // Rename keeps the mtime, so this is a live holder's lock
            match fs::hard_link(&claimed, path) {
                Ok(()) => debug!(lock = %path.display(), "returned live store lock"),
                Err(e) => warn!(lock = %path.display(), error = %e, "could not return live store lock"),
            }
        }
        if let Err(e) = fs::remove_file(&claimed) {
            warn!(lock = %claimed.display(), error = %e, "failed to remove claimed store lock");
        }
    }

    fn lock_is_stale(&self, path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .map(|age| age > self.options.stale_lock_after)
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("root", &self.root)
            .field("options", &self.options)
            .finish()
    }
}

/// Holds a tenant's lock file; removes it on drop
struct DirLock {
    path: PathBuf,
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "failed to release store lock");
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

impl StateStore for FileStore {
    fn get(&self, tenant: &TenantId, key: &str) -> StorageResult<Option<Versioned>> {
        let dir = self.tenant_dir(tenant)?;
        let path = Self::record_path(&dir, key)?;
        let label = format!("{}/{}", tenant, key);

        Ok(Self::read_record(&path, &label)?.and_then(|record| {
            record.payload.map(|value| Versioned {
                value,
                version: record.version,
            })
        }))
    }

    fn compare_and_swap(
        &self,
        tenant: &TenantId,
        key: &str,
        expected: Option<Version>,
        value: Option<Vec<u8>>,
    ) -> StorageResult<Option<Version>> {
        let dir = self.tenant_dir(tenant)?;
        let path = Self::record_path(&dir, key)?;
        let label = format!("{}/{}", tenant, key);
        fs::create_dir_all(&dir)?;

        let _local = self.local.lock();
        let _lock = self.lock_dir(&dir)?;

        let current = Self::read_record(&path, &label)?;
        let actual = current
            .as_ref()
            .filter(|r| r.payload.is_some())
            .map(|r| r.version);
        if actual != expected {
            return Err(StorageError::Conflict {
                key: label,
                expected,
                actual,
            });
        }

        let next = current
            .as_ref()
            .map(|r| r.version.next())
            .unwrap_or(Version::FIRST);

        match value {
            Some(payload) => {
                self.write_record(
                    &dir,
                    &path,
                    &StoredRecord {
                        version: next,
                        payload: Some(payload),
                    },
                )?;
                Ok(Some(next))
            }
            None => {
                if current.is_some() {
                    self.write_record(
                        &dir,
                        &path,
                        &StoredRecord {
                            version: next,
                            payload: None,
                        },
                    )?;
                }
                Ok(None)
            }
        }
    }

    fn tenants(&self) -> StorageResult<Vec<TenantId>> {
        let mut tenants = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let tenant = TenantId::new(name);
            if !tenant.is_valid() {
                continue;
            }

            let mut live = false;
            for file in fs::read_dir(entry.path())? {
                let path = file?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                    continue;
                }
                if let Some(record) = Self::read_record(&path, &path.display().to_string())? {
                    if record.payload.is_some() {
                        live = true;
                        break;
                    }
                }
            }
            if live {
                tenants.push(tenant);
            }
        }
        tenants.sort();
        Ok(tenants)
    }
}
