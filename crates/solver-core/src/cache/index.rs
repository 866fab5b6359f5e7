//! ============================================================================
//! Label Index - The three mutually consistent views of the label set
//! ============================================================================
//! - digest → name (primary)
//! - name → digests (reverse lookup; one person can have several pictures)
//! - first letter → names (alphabetical listing and prefix lookups)
//!
//! Not synchronized; `LabelCache` wraps it in a lock so every mutation is
//! observed whole.
//! ============================================================================

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::types::{CacheStats, LabelRecord, UpsertOutcome};
use crate::digest::ImageDigest;

#[derive(Debug, Default, Clone)]
pub struct LabelIndex {
    by_digest: HashMap<ImageDigest, String>,
    by_name: HashMap<String, BTreeSet<ImageDigest>>,
    by_letter: BTreeMap<char, BTreeSet<String>>,
}

/// Lowercased first character of a name
pub fn letter_key(name: &str) -> Option<char> {
    name.chars().next().and_then(|c| c.to_lowercase().next())
}

impl LabelIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a LabelRecord>) -> Self {
        let mut index = Self::new();
        for record in records {
            index.upsert(record.digest, &record.name);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.by_digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }

    pub fn get(&self, digest: &ImageDigest) -> Option<&str> {
        self.by_digest.get(digest).map(String::as_str)
    }

    /// First digest (in digest order) recorded for a name
    pub fn digest_for(&self, name: &str) -> Option<ImageDigest> {
        self.by_name
            .get(name)
            .and_then(|digests| digests.iter().next().copied())
    }

    pub fn digests_for(&self, name: &str) -> Vec<ImageDigest> {
        self.by_name
            .get(name)
            .map(|digests| digests.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn names_by_letter(&self, letter: char) -> Vec<String> {
        let key = letter.to_lowercase().next().unwrap_or(letter);
        self.by_letter
            .get(&key)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Insert or correct a label, keeping all three views in step
    pub fn upsert(&mut self, digest: ImageDigest, name: &str) -> UpsertOutcome {
        let name = name.trim();
        if name.is_empty() {
            return UpsertOutcome::Rejected;
        }

        let outcome = match self.by_digest.get(&digest) {
            Some(existing) if existing == name => return UpsertOutcome::Unchanged,
            Some(existing) => {
                let previous = existing.clone();
                self.detach(&digest, &previous);
                UpsertOutcome::Corrected { previous }
            }
            None => UpsertOutcome::Inserted,
        };

        self.by_digest.insert(digest, name.to_string());
        self.by_name
            .entry(name.to_string())
            .or_default()
            .insert(digest);
        if let Some(letter) = letter_key(name) {
            self.by_letter
                .entry(letter)
                .or_default()
                .insert(name.to_string());
        }

        outcome
    }

    /// Drop a digest from the reverse views of its old name
    fn detach(&mut self, digest: &ImageDigest, name: &str) {
        let name_now_empty = match self.by_name.get_mut(name) {
            Some(digests) => {
                digests.remove(digest);
                digests.is_empty()
            }
            None => false,
        };
        if !name_now_empty {
            return;
        }

        self.by_name.remove(name);
        if let Some(letter) = letter_key(name) {
            if let Some(names) = self.by_letter.get_mut(&letter) {
                names.remove(name);
                if names.is_empty() {
                    self.by_letter.remove(&letter);
                }
            }
        }
    }

    /// All records, sorted by name then digest
    pub fn records(&self) -> Vec<LabelRecord> {
        let mut records: Vec<LabelRecord> = self
            .by_digest
            .iter()
            .map(|(digest, name)| LabelRecord::new(*digest, name.clone()))
            .collect();
        records.sort();
        records
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            labels: self.by_digest.len(),
            distinct_names: self.by_name.len(),
            names_per_letter: self
                .by_letter
                .iter()
                .map(|(letter, names)| (*letter, names.len()))
                .collect(),
        }
    }

    pub fn clear(&mut self) {
        self.by_digest.clear();
        self.by_name.clear();
        self.by_letter.clear();
    }

    /// Check the three views agree; used by tests
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        let names_ok = self.by_digest.iter().all(|(digest, name)| {
            self.by_name
                .get(name)
                .is_some_and(|digests| digests.contains(digest))
        });
        let reverse_ok = self.by_name.iter().all(|(name, digests)| {
            !digests.is_empty()
                && digests
                    .iter()
                    .all(|d| self.by_digest.get(d).map(String::as_str) == Some(name.as_str()))
        });
        let letters_ok = self.by_name.keys().all(|name| {
            letter_key(name)
                .and_then(|l| self.by_letter.get(&l))
                .is_some_and(|names| names.contains(name))
        }) && self
            .by_letter
            .values()
            .flatten()
            .all(|name| self.by_name.contains_key(name));
        names_ok && reverse_ok && letters_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(tag: &str) -> ImageDigest {
        ImageDigest::of(tag.as_bytes())
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut index = LabelIndex::new();
        assert_eq!(index.upsert(d("a"), "Alice"), UpsertOutcome::Inserted);
        assert_eq!(index.upsert(d("a2"), "Alice"), UpsertOutcome::Inserted);
        assert_eq!(index.upsert(d("b"), "bob"), UpsertOutcome::Inserted);

        assert_eq!(index.get(&d("a")), Some("Alice"));
        assert_eq!(index.digests_for("Alice").len(), 2);
        assert!(index.digest_for("Alice").is_some());
        assert_eq!(index.names_by_letter('A'), vec!["Alice".to_string()]);
        assert_eq!(index.names_by_letter('b'), vec!["bob".to_string()]);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_correction_moves_reverse_entries() {
        let mut index = LabelIndex::new();
        index.upsert(d("x"), "Alice");
        let outcome = index.upsert(d("x"), "Bob");

        assert_eq!(
            outcome,
            UpsertOutcome::Corrected {
                previous: "Alice".to_string()
            }
        );
        assert_eq!(index.get(&d("x")), Some("Bob"));
        assert!(index.digest_for("Alice").is_none());
        assert!(index.names_by_letter('a').is_empty());
        assert_eq!(index.names_by_letter('b'), vec!["Bob".to_string()]);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_correction_keeps_other_pictures_of_old_name() {
        let mut index = LabelIndex::new();
        index.upsert(d("x"), "Alice");
        index.upsert(d("y"), "Alice");
        index.upsert(d("x"), "Anna");

        assert_eq!(index.digests_for("Alice"), vec![d("y")]);
        assert_eq!(
            index.names_by_letter('a'),
            vec!["Alice".to_string(), "Anna".to_string()]
        );
        assert!(index.is_consistent());
    }

    #[test]
    fn test_unchanged_and_rejected() {
        let mut index = LabelIndex::new();
        index.upsert(d("x"), "Alice");
        assert_eq!(index.upsert(d("x"), " Alice "), UpsertOutcome::Unchanged);
        assert_eq!(index.upsert(d("y"), "   "), UpsertOutcome::Rejected);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_records_sorted_by_name() {
        let mut index = LabelIndex::new();
        index.upsert(d("1"), "Zoe");
        index.upsert(d("2"), "Adam");
        index.upsert(d("3"), "Mia");

        let names: Vec<_> = index.records().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Adam", "Mia", "Zoe"]);

        let stats = index.stats();
        assert_eq!(stats.labels, 3);
        assert_eq!(stats.distinct_names, 3);
        assert_eq!(stats.names_per_letter.get(&'z'), Some(&1));
    }

    #[test]
    fn test_clear() {
        let mut index = LabelIndex::from_records(&[LabelRecord::new(d("1"), "Zoe")]);
        assert_eq!(index.len(), 1);
        index.clear();
        assert!(index.is_empty());
        assert!(index.names_by_letter('z').is_empty());
    }
}
