//! ============================================================================
//! Snapshot Store - Durable JSON file of every known label
//! ============================================================================
//! Format: `[{"name": "...", "hash": "<hex sha256>"}, ...]` sorted by name.
//! The older object form `{"<hex>": "<name>"}` is still accepted on read.
//! Writes go to a sibling temp file that is renamed over the target, so a
//! crash mid-write leaves the previous snapshot intact. An unparseable file
//! is moved aside on read so the next save cannot overwrite it.
//! Default path: ~/.faces/faces_data.json (override via FACES_DATA_PATH)
//! ============================================================================

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::types::{LabelRecord, ParsedSnapshot, SnapshotFormat};
use crate::digest::ImageDigest;

/// Durable backend for the full label set
pub trait SnapshotStore: Send + Sync {
    /// Every stored record; an absent snapshot is an empty list
    fn read_all(&self) -> Result<Vec<LabelRecord>>;

    /// Atomically replace the stored records
    fn write_all(&self, records: &[LabelRecord]) -> Result<()>;
}

/// Snapshot kept as a pretty-printed JSON file
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "faces_data.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// `<stem>_<tag>_<unix ts>.json` beside the snapshot
    fn sibling(&self, tag: &str) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("faces_data");
        self.path.with_file_name(format!(
            "{}_{}_{}.json",
            stem,
            tag,
            chrono::Utc::now().timestamp()
        ))
    }

    /// Copy the current snapshot aside as `<stem>_backup_<unix ts>.json`.
    /// Returns None when there is nothing to back up.
    pub fn backup(&self) -> Result<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let backup = self.sibling("backup");
        fs::copy(&self.path, &backup)
            .map_err(|e| anyhow!("Failed to back up {}: {}", self.path.display(), e))?;
        info!("Snapshot backed up to {}", backup.display());
        Ok(Some(backup))
    }

    /// Move an unreadable snapshot to `<stem>_corrupt_<unix ts>.json`
    fn quarantine(&self) -> Result<PathBuf> {
        let target = self.sibling("corrupt");
        fs::rename(&self.path, &target)
            .map_err(|e| anyhow!("Failed to move {} aside: {}", self.path.display(), e))?;
        warn!("Unreadable snapshot moved to {}", target.display());
        Ok(target)
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn read_all(&self) -> Result<Vec<LabelRecord>> {
        if !self.path.exists() {
            debug!("No snapshot at {}, starting empty", self.path.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| anyhow!("Failed to read {}: {}", self.path.display(), e))?;
        let records = match parse_snapshot(&content) {
            Ok(parsed) => parsed.records,
            Err(e) => {
                return Err(match self.quarantine() {
                    Ok(moved) => anyhow!("{}; original kept at {}", e, moved.display()),
                    Err(move_err) => anyhow!("{}; {}", e, move_err),
                })
            }
        };

        info!(
            "Loaded {} labels from {}",
            records.len(),
            self.path.display()
        );
        Ok(records)
    }

    fn write_all(&self, records: &[LabelRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Failed to create {}: {}", parent.display(), e))?;
        }

        let mut sorted = records.to_vec();
        sorted.sort();
        let body = serde_json::to_vec_pretty(&sorted)
            .map_err(|e| anyhow!("Failed to serialize snapshot: {}", e))?;

        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)
                .map_err(|e| anyhow!("Failed to create {}: {}", temp.display(), e))?;
            file.write_all(&body)
                .map_err(|e| anyhow!("Failed to write {}: {}", temp.display(), e))?;
            file.sync_all()
                .map_err(|e| anyhow!("Failed to sync {}: {}", temp.display(), e))?;
        }
        fs::rename(&temp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            anyhow!("Failed to replace {}: {}", self.path.display(), e)
        })?;

        debug!("Wrote {} labels to {}", sorted.len(), self.path.display());
        Ok(())
    }
}

/// Parse either snapshot layout. Malformed entries are skipped, a malformed
/// document is an error.
pub fn parse_snapshot(content: &str) -> Result<ParsedSnapshot> {
    let document: Value =
        serde_json::from_str(content).map_err(|e| anyhow!("Snapshot is not valid JSON: {}", e))?;

    let (format, pairs): (SnapshotFormat, Vec<(Option<&str>, Option<&str>)>) = match &document {
        Value::Array(items) => (
            SnapshotFormat::List,
            items
                .iter()
                .map(|item| {
                    (
                        item.get("hash").and_then(Value::as_str),
                        item.get("name").and_then(Value::as_str),
                    )
                })
                .collect(),
        ),
        Value::Object(map) => (
            SnapshotFormat::LegacyMap,
            map.iter()
                .map(|(hash, name)| (Some(hash.as_str()), name.as_str()))
                .collect(),
        ),
        other => {
            return Err(anyhow!(
                "Snapshot must be a list or an object, found {}",
                json_kind(other)
            ))
        }
    };

    let mut records = Vec::with_capacity(pairs.len());
    let mut skipped = 0usize;
    for pair in pairs {
        match pair {
            (Some(hash), Some(name)) if !name.trim().is_empty() => {
                match hash.parse::<ImageDigest>() {
                    Ok(digest) => records.push(LabelRecord::new(digest, name.trim())),
                    Err(e) => {
                        debug!("Skipping snapshot entry: {}", e);
                        skipped += 1;
                    }
                }
            }
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!("Skipped {} malformed snapshot entries", skipped);
    }
    if format == SnapshotFormat::LegacyMap {
        warn!(
            "Snapshot uses the legacy {{hash: name}} layout; labels hashed from base64 text will not match fetched pictures"
        );
    }
    Ok(ParsedSnapshot {
        records,
        format,
        skipped,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
