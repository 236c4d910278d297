//! Options accepted by the trigger API

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which logical indices a run covers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexSelection {
    /// Every enabled index
    #[default]
    All,
    /// Only the named indices (still intersected with enabled ones)
    Only(BTreeSet<String>),
}

impl IndexSelection {
    /// Select the given names
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IndexSelection::Only(names.into_iter().map(Into::into).collect())
    }

    /// Check if an index is selected
    pub fn includes(&self, index_name: &str) -> bool {
        match self {
            IndexSelection::All => true,
            IndexSelection::Only(names) => names.contains(index_name),
        }
    }
}

/// Options of a `start` request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Walk every site of the network
    pub network_wide: bool,
    /// Indices to sync
    pub index_names: IndexSelection,
    /// Delete and recreate index schemas before syncing
    pub setup: bool,
    /// Continue from the persisted checkpoint instead of starting over
    pub resume: bool,
}

impl SyncOptions {
    /// Options for a full, single-site sync
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style network-wide flag
    pub fn network_wide(mut self, network_wide: bool) -> Self {
        self.network_wide = network_wide;
        self
    }

    /// Builder-style index selection
    pub fn indices(mut self, selection: IndexSelection) -> Self {
        self.index_names = selection;
        self
    }

    /// Builder-style setup flag
    pub fn setup(mut self, setup: bool) -> Self {
        self.setup = setup;
        self
    }

    /// Builder-style resume flag
    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }
}
