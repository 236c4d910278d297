//! Core identifier types
//!
//! This module defines the identifiers used throughout the system:
//! - [`TenantId`]: A single logical site/store being synchronized
//! - [`TriggerSource`]: Which caller type initiated a run
//! - [`RunId`]: Unique identifier of one synchronization run
//! - [`Version`]: Monotonic version of a stored state record

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a record in the content store.
///
/// Cursors order records by strictly increasing id.
pub type RecordId = u64;

/// Identifier of a tenant (site) whose content is synchronized
///
/// All persisted sync state (run lock, checkpoint, enabled features) is
/// partitioned by tenant. The reserved [`TenantId::network`] tenant owns the
/// lock of network-wide runs that walk every site in turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Name of the reserved network-wide tenant
    pub const NETWORK: &'static str = "network";

    /// Create a tenant id from any string-like value
    ///
    /// # Examples
    ///
    /// ```
    /// use indexsync_core::TenantId;
    ///
    /// let site = TenantId::new("1");
    /// assert_eq!(site.as_str(), "1");
    /// assert!(!site.is_network());
    /// ```
    pub fn new(id: impl Into<String>) -> Self {
        TenantId(id.into())
    }

    /// The reserved tenant that owns network-wide runs
    pub fn network() -> Self {
        TenantId(Self::NETWORK.to_string())
    }

    /// Check if this is the reserved network tenant
    pub fn is_network(&self) -> bool {
        self.0 == Self::NETWORK
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that the id is usable as a storage path component
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= 128
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && self.0 != "."
            && self.0 != ".."
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        TenantId::new(s)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        TenantId(s)
    }
}

/// The caller type that initiated a run
///
/// Mutual exclusion is enforced across trigger sources: a run owned by the
/// dashboard rejects starts from the command line, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerSource {
    /// Interactive dashboard (web admin)
    Dashboard,
    /// Command-line invocation
    Cli,
}

impl TriggerSource {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Dashboard => "dashboard",
            TriggerSource::Cli => "cli",
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier for one synchronization run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random RunId using UUID v4
    ///
    /// # Examples
    ///
    /// ```
    /// use indexsync_core::RunId;
    ///
    /// let id1 = RunId::new();
    /// let id2 = RunId::new();
    /// assert_ne!(id1, id2);
    /// ```
    pub fn new() -> Self {
        RunId(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version of a stored state record
///
/// Versions start at 1 for a freshly created record and increase by one on
/// every successful compare-and-swap. A deleted record has no version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Version of a freshly created record
    pub const FIRST: Version = Version(1);

    /// Wrap a raw version number
    pub const fn new(v: u64) -> Self {
        Version(v)
    }

    /// Raw version number
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The version that follows this one
    pub const fn next(&self) -> Version {
        Version(self.0 + 1)
    }
}

impl From<u64> for Version {
    fn from(v: u64) -> Self {
        Version(v)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}
