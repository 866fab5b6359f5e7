//! ============================================================================
//! Label Cache - Shared, synchronized label service for a run
//! ============================================================================
//! Built once per run and handed to the precacher and the orchestrator as an
//! `Arc<LabelCache>`. Reads take a shared lock, `upsert` takes the write lock
//! and updates every index before releasing it. Saves run one at a time, so
//! an older snapshot never lands after a newer one.
//! ============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::index::LabelIndex;
use super::storage::LabelStorage;
use super::types::{CacheStats, LabelRecord, LoadReport, MergeSummary, PersistReport, UpsertOutcome};
use crate::digest::ImageDigest;
use crate::types::{FacesError, FacesResult};

pub struct LabelCache {
    index: RwLock<LabelIndex>,
    storage: Arc<LabelStorage>,
    /// Bumped on every change
    generation: AtomicU64,
    /// Generation last written to storage
    saved_generation: AtomicU64,
    /// Held from snapshot to generation update
    save_lock: Mutex<()>,
}

impl LabelCache {
    /// Empty cache over the given storage; call `load` to seed it
    pub fn new(storage: LabelStorage) -> Self {
        Self {
            index: RwLock::new(LabelIndex::new()),
            storage: Arc::new(storage),
            generation: AtomicU64::new(0),
            saved_generation: AtomicU64::new(0),
            save_lock: Mutex::new(()),
        }
    }

    /// Seed the indices from the durable snapshot. Never fails: an unreadable
    /// snapshot leaves the cache empty and is reported as a warning.
    pub async fn load(&self) -> LoadReport {
        let storage = Arc::clone(&self.storage);
        let loaded = tokio::task::spawn_blocking(move || storage.load())
            .await
            .map_err(|e| anyhow::anyhow!("Snapshot loader panicked: {}", e))
            .and_then(|result| result);

        let mut index = self.index.write().await;
        match loaded {
            Ok(records) => {
                *index = LabelIndex::from_records(&records);
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                self.saved_generation.store(generation, Ordering::SeqCst);
                info!("Label cache seeded with {} labels", index.len());
                LoadReport {
                    loaded: index.len(),
                    warning: None,
                }
            }
            Err(e) => {
                warn!("Label snapshot unreadable, starting empty: {}", e);
                index.clear();
                LoadReport {
                    loaded: 0,
                    warning: Some(FacesError::CacheCorruption(e.to_string())),
                }
            }
        }
    }

    pub async fn lookup_by_digest(&self, digest: &ImageDigest) -> Option<String> {
        self.index.read().await.get(digest).map(str::to_string)
    }

    pub async fn lookup_by_name(&self, name: &str) -> Option<ImageDigest> {
        self.index.read().await.digest_for(name)
    }

    pub async fn digests_for_name(&self, name: &str) -> Vec<ImageDigest> {
        self.index.read().await.digests_for(name)
    }

    pub async fn names_by_letter(&self, letter: char) -> Vec<String> {
        self.index.read().await.names_by_letter(letter)
    }

    /// Record `digest → name`, replacing any different name already stored
    pub async fn upsert(&self, digest: ImageDigest, name: &str) -> UpsertOutcome {
        let outcome = self.index.write().await.upsert(digest, name);

        match &outcome {
            UpsertOutcome::Inserted => {
                self.touch();
                debug!("Learned {} -> {}", digest.short(), name.trim());
            }
            UpsertOutcome::Corrected { previous } => {
                self.touch();
                info!(
                    "Corrected {}: '{}' -> '{}'",
                    digest.short(),
                    previous,
                    name.trim()
                );
            }
            UpsertOutcome::Unchanged => {}
            UpsertOutcome::Rejected => {
                warn!("Refusing empty name for {}", digest.short());
            }
        }
        outcome
    }

    /// Upsert every record of an imported snapshot
    pub async fn merge(&self, records: &[LabelRecord]) -> MergeSummary {
        let mut summary = MergeSummary::default();
        {
            let mut index = self.index.write().await;
            for record in records {
                summary.add(&index.upsert(record.digest, &record.name));
            }
        }
        if summary.inserted + summary.corrected > 0 {
            self.touch();
        }
        info!(
            "Merged {} records: {} new, {} corrected, {} unchanged",
            records.len(),
            summary.inserted,
            summary.corrected,
            summary.unchanged
        );
        summary
    }

    /// Resolve digests missing from memory against the fast store in one
    /// batch; hits are folded into the cache.
    pub async fn resolve_missing(&self, digests: &[ImageDigest]) -> HashMap<ImageDigest, String> {
        if !self.storage.has_fast_store() {
            return HashMap::new();
        }

        let missing: Vec<ImageDigest> = {
            let index = self.index.read().await;
            let mut missing: Vec<_> = digests
                .iter()
                .filter(|d| index.get(d).is_none())
                .copied()
                .collect();
            missing.sort();
            missing.dedup();
            missing
        };
        if missing.is_empty() {
            return HashMap::new();
        }

        let storage = Arc::clone(&self.storage);
        let found = match tokio::task::spawn_blocking(move || storage.fast_lookup(&missing)).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Fast store lookup task failed: {}", e);
                return HashMap::new();
            }
        };

        for (digest, name) in &found {
            self.upsert(*digest, name).await;
        }
        found
    }

    /// Current records sorted by name
    pub async fn snapshot(&self) -> Vec<LabelRecord> {
        self.index.read().await.records()
    }

    /// Write the snapshot through both storage tiers
    pub async fn save(&self) -> FacesResult<PersistReport> {
        let _saving = self.save_lock.lock().await;
        let (records, generation) = {
            let index = self.index.read().await;
            (index.records(), self.generation.load(Ordering::SeqCst))
        };

        let storage = Arc::clone(&self.storage);
        let report = tokio::task::spawn_blocking(move || storage.persist(&records))
            .await
            .map_err(|e| FacesError::StorageWriteFailure(e.to_string()))?
            .map_err(|e| FacesError::StorageWriteFailure(e.to_string()))?;

        self.saved_generation.store(generation, Ordering::SeqCst);
        info!("Saved {} labels", report.records);
        Ok(report)
    }

    /// Save only when something changed since the last save
    pub async fn save_if_dirty(&self) -> FacesResult<Option<PersistReport>> {
        if !self.is_dirty() {
            return Ok(None);
        }
        self.save().await.map(Some)
    }

    pub fn is_dirty(&self) -> bool {
        self.generation.load(Ordering::SeqCst) != self.saved_generation.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.read().await.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        self.index.read().await.stats()
    }

    /// Forget every label. The fast store is emptied now, the snapshot on
    /// the next save.
    pub async fn clear(&self) {
        self.index.write().await.clear();
        self.touch();

        let storage = Arc::clone(&self.storage);
        match tokio::task::spawn_blocking(move || storage.clear_fast_store()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Fast store not cleared: {}", e),
            Err(e) => warn!("Fast store clear task failed: {}", e),
        }
        info!("Label cache cleared");
    }

    fn touch(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
