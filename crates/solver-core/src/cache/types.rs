//! ============================================================================
//! Cache Types - Records and bookkeeping for the label cache
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::digest::ImageDigest;

/// One digest → name association, as persisted in the snapshot file
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelRecord {
    /// Ordered by name first so snapshots sort alphabetically
    pub name: String,
    #[serde(rename = "hash")]
    pub digest: ImageDigest,
}

impl LabelRecord {
    pub fn new(digest: ImageDigest, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            digest,
        }
    }
}

/// Layout of a snapshot document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    /// `[{"name": ..., "hash": ...}]`
    List,
    /// `{"<hash>": "<name>"}`. Files in this form were often keyed by a
    /// digest of the base64 text rather than of the picture bytes, and such
    /// entries never match a fetched picture.
    LegacyMap,
}

/// Records parsed from a snapshot document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSnapshot {
    pub records: Vec<LabelRecord>,
    pub format: SnapshotFormat,
    /// Entries dropped for a missing or malformed field
    pub skipped: usize,
}

/// What an upsert did to the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// The digest was known under a different name
    Corrected { previous: String },
    Unchanged,
    /// Empty names are never stored
    Rejected,
}

impl UpsertOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted | UpsertOutcome::Corrected { .. })
    }
}

/// Counts from merging an imported snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    pub inserted: usize,
    pub corrected: usize,
    pub unchanged: usize,
    pub rejected: usize,
}

impl MergeSummary {
    pub fn add(&mut self, outcome: &UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Corrected { .. } => self.corrected += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
            UpsertOutcome::Rejected => self.rejected += 1,
        }
    }
}

/// Cache statistics for display
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub labels: usize,
    pub distinct_names: usize,
    /// Number of names per lowercase first letter
    pub names_per_letter: BTreeMap<char, usize>,
}

/// Result of loading the durable snapshot
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub loaded: usize,
    /// Set when the snapshot existed but could not be read
    pub warning: Option<crate::types::FacesError>,
}

/// Result of a save through the storage tiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistReport {
    pub records: usize,
    pub fast_store: FastStoreSync,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastStoreSync {
    Synced,
    /// No fast store configured
    Skipped,
    Failed(String),
}
