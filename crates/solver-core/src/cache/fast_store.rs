// ============================================================================
// Fast Label Store - Embedded Database (redb)
// ============================================================================
// Optional accelerant beside the JSON snapshot. Every operation is a batch:
// one transaction per call regardless of how many digests are involved.
// Path comes from SolverConfig::store_path (default ~/.faces/labels.redb)
// ============================================================================

use anyhow::{anyhow, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::types::LabelRecord;
use crate::digest::ImageDigest;

// Table definitions
const LABELS: TableDefinition<&[u8], &str> = TableDefinition::new("labels");

/// Batched key-value backend for labels
pub trait FastStore: Send + Sync {
    /// Look up many digests in one round trip; unknown digests are absent
    fn batch_get(&self, digests: &[ImageDigest]) -> Result<HashMap<ImageDigest, String>>;

    /// Write many records in one round trip
    fn batch_set(&self, records: &[LabelRecord]) -> Result<()>;

    fn len(&self) -> Result<u64>;

    /// Drop every stored label
    fn clear(&self) -> Result<()>;
}

/// Fast store backed by a redb file
pub struct RedbFastStore {
    db: Database,
    path: PathBuf,
}

impl RedbFastStore {
    /// Open (or create) the store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let db_path = path.to_path_buf();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Failed to create {}: {}", parent.display(), e))?;
        }

        info!("Opening label store at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open label store: {}", e))?;

        // Ensure the table exists so read transactions can open it
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(LABELS)
                .map_err(|e| anyhow!("Failed to create labels table: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        Ok(Self { db, path: db_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FastStore for RedbFastStore {
    fn batch_get(&self, digests: &[ImageDigest]) -> Result<HashMap<ImageDigest, String>> {
        let mut found = HashMap::new();
        if digests.is_empty() {
            return Ok(found);
        }

        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(LABELS)
            .map_err(|e| anyhow!("Failed to open labels table: {}", e))?;

        for digest in digests {
            let key: &[u8] = digest.as_bytes();
            if let Some(value) = table
                .get(key)
                .map_err(|e| anyhow!("Failed to get label: {}", e))?
            {
                found.insert(*digest, value.value().to_string());
            }
        }

        debug!("Fast store hit {}/{} digests", found.len(), digests.len());
        Ok(found)
    }

    fn batch_set(&self, records: &[LabelRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn
                .open_table(LABELS)
                .map_err(|e| anyhow!("Failed to open labels table: {}", e))?;
            for record in records {
                let key: &[u8] = record.digest.as_bytes();
                table
                    .insert(key, record.name.as_str())
                    .map_err(|e| anyhow!("Failed to insert label: {}", e))?;
            }
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Fast store wrote {} labels", records.len());
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(LABELS)
            .map_err(|e| anyhow!("Failed to open labels table: {}", e))?;
        table
            .len()
            .map_err(|e| anyhow!("Failed to count labels: {}", e))
    }

    fn clear(&self) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        write_txn
            .delete_table(LABELS)
            .map_err(|e| anyhow!("Failed to drop labels table: {}", e))?;
        {
            let _ = write_txn
                .open_table(LABELS)
                .map_err(|e| anyhow!("Failed to recreate labels table: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit: {}", e))?;

        info!("Fast store cleared");
        Ok(())
    }
}
