//! ============================================================================
//! Label Storage - Write-through composition of the two persistence tiers
//! ============================================================================
//! The durable snapshot is always written and its failure is an error. The
//! fast store, when configured, receives the same records in one batch and
//! its failure only degrades performance.
//! ============================================================================

use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use super::fast_store::{FastStore, RedbFastStore};
use super::snapshot::{JsonSnapshotStore, SnapshotStore};
use super::types::{FastStoreSync, LabelRecord, PersistReport};
use crate::digest::ImageDigest;

pub struct LabelStorage {
    durable: Box<dyn SnapshotStore>,
    fast: Option<Box<dyn FastStore>>,
}

impl LabelStorage {
    /// Snapshot-only storage
    pub fn new(durable: Box<dyn SnapshotStore>) -> Self {
        Self {
            durable,
            fast: None,
        }
    }

    /// JSON snapshot at `data_path`, plus the redb fast store when a path is
    /// given. A fast store that cannot be opened is skipped.
    pub fn open(data_path: &Path, store_path: Option<&Path>) -> Self {
        let storage = Self::new(Box::new(JsonSnapshotStore::new(data_path)));
        let Some(store_path) = store_path else {
            return storage;
        };

        match RedbFastStore::open(store_path) {
            Ok(fast) => storage.with_fast_store(Box::new(fast)),
            Err(e) => {
                warn!("Fast store unavailable, continuing with the snapshot only: {}", e);
                storage
            }
        }
    }

    pub fn with_fast_store(mut self, fast: Box<dyn FastStore>) -> Self {
        self.fast = Some(fast);
        self
    }

    pub fn has_fast_store(&self) -> bool {
        self.fast.is_some()
    }

    /// Read the durable snapshot
    pub fn load(&self) -> Result<Vec<LabelRecord>> {
        self.durable.read_all()
    }

    /// Write the durable snapshot, then mirror into the fast store
    pub fn persist(&self, records: &[LabelRecord]) -> Result<PersistReport> {
        self.durable.write_all(records)?;

        let fast_store = match &self.fast {
            None => FastStoreSync::Skipped,
            Some(fast) => match fast.batch_set(records) {
                Ok(()) => FastStoreSync::Synced,
                Err(e) => {
                    warn!("Fast store sync failed, snapshot still written: {}", e);
                    FastStoreSync::Failed(e.to_string())
                }
            },
        };

        Ok(PersistReport {
            records: records.len(),
            fast_store,
        })
    }

    /// Empty the fast store so cleared labels are not hydrated again
    pub fn clear_fast_store(&self) -> Result<()> {
        match &self.fast {
            Some(fast) => fast.clear(),
            None => Ok(()),
        }
    }

    /// Batch lookup against the fast store. Absent or failing stores yield
    /// no hits.
    pub fn fast_lookup(&self, digests: &[ImageDigest]) -> HashMap<ImageDigest, String> {
        let Some(fast) = &self.fast else {
            return HashMap::new();
        };
        if digests.is_empty() {
            return HashMap::new();
        }

        match fast.batch_get(digests) {
            Ok(found) => {
                debug!("Fast store resolved {}/{} digests", found.len(), digests.len());
                found
            }
            Err(e) => {
                warn!("Fast store lookup failed: {}", e);
                HashMap::new()
            }
        }
    }
}
