//! ============================================================================
//! Precaching Pipeline - Resolve a session's pictures before answering
//! ============================================================================
//! Question ids are global and sequential, so the pictures of a session can
//! be fetched by id before its questions are asked. Fetches run concurrently
//! (bounded), each picture is digested and looked up in the label cache, and
//! every miss is retried against the fast store in one batch at the end.
//! ============================================================================

use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::GameApi;
use crate::cache::LabelCache;
use crate::digest::ImageDigest;
use crate::retry::{with_retry, RetryConfig};
use crate::types::{
    FacesError, FacesResult, PrecacheEntry, PrecacheMap, QuestionId, Resolution,
};

pub struct Precacher {
    api: Arc<dyn GameApi>,
    cache: Arc<LabelCache>,
    concurrency: usize,
    retry: RetryConfig,
}

impl Precacher {
    pub fn new(
        api: Arc<dyn GameApi>,
        cache: Arc<LabelCache>,
        concurrency: usize,
        retry: RetryConfig,
    ) -> Self {
        Self {
            api,
            cache,
            concurrency: concurrency.max(1),
            retry,
        }
    }

    /// Resolve `count` slots starting at `start`. The map always holds
    /// exactly `count` entries; slots whose picture could not be fetched
    /// carry no digest.
    pub async fn precache(
        &self,
        game_id: &str,
        start: QuestionId,
        count: u32,
        cancel: &CancellationToken,
    ) -> FacesResult<PrecacheMap> {
        let ids = start..start + u64::from(count);
        let fetches = stream::iter(ids)
            .map(|question_id| self.precache_slot(game_id, question_id, cancel))
            .buffer_unordered(self.concurrency)
            .collect::<Vec<PrecacheEntry>>();

        let mut entries = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FacesError::Cancelled),
            entries = fetches => entries,
        };

        let missing: Vec<ImageDigest> = entries
            .iter()
            .filter(|entry| !entry.resolution.is_resolved())
            .filter_map(|entry| entry.digest)
            .collect();
        if !missing.is_empty() {
            let found = self.cache.resolve_missing(&missing).await;
            for entry in entries.iter_mut() {
                if let Some(name) = entry.digest.as_ref().and_then(|d| found.get(d)) {
                    entry.resolution = Resolution::Resolved(name.clone());
                }
            }
        }

        let map: PrecacheMap = entries
            .into_iter()
            .map(|entry| (entry.question_id, entry))
            .collect();
        let resolved = map.values().filter(|e| e.resolution.is_resolved()).count();
        info!(
            "Precached questions {}..{}: {}/{} resolved",
            start,
            start + u64::from(count),
            resolved,
            count
        );
        Ok(map)
    }

    /// Fetch, digest and resolve a single question's picture, consulting the
    /// fast store on a miss
    pub async fn resolve_one(
        &self,
        game_id: &str,
        question_id: QuestionId,
        cancel: &CancellationToken,
    ) -> FacesResult<(ImageDigest, Resolution)> {
        let (digest, resolution) = self.fetch_and_lookup(game_id, question_id, cancel).await?;
        if resolution.is_resolved() {
            return Ok((digest, resolution));
        }
        let found = self.cache.resolve_missing(&[digest]).await;
        Ok((digest, Resolution::from_lookup(found.get(&digest).cloned())))
    }

    async fn precache_slot(
        &self,
        game_id: &str,
        question_id: QuestionId,
        cancel: &CancellationToken,
    ) -> PrecacheEntry {
        match self.fetch_and_lookup(game_id, question_id, cancel).await {
            Ok((digest, resolution)) => PrecacheEntry {
                question_id,
                digest: Some(digest),
                resolution,
            },
            Err(e) => {
                debug!("No picture for question {}: {}", question_id, e);
                PrecacheEntry::failed(question_id)
            }
        }
    }

    async fn fetch_and_lookup(
        &self,
        game_id: &str,
        question_id: QuestionId,
        cancel: &CancellationToken,
    ) -> FacesResult<(ImageDigest, Resolution)> {
        let label = format!("picture {}", question_id);
        let bytes = with_retry(&self.retry, &label, cancel, || {
            self.api.fetch_image(game_id, question_id)
        })
        .await?;

        let digest = ImageDigest::of(&bytes);
        let resolution = Resolution::from_lookup(self.cache.lookup_by_digest(&digest).await);
        debug!(
            "Question {} -> {} ({})",
            question_id,
            digest.short(),
            resolution.name().unwrap_or("unknown")
        );
        Ok((digest, resolution))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{LabelRecord, LabelStorage};
    use crate::testing::{portrait, MemoryFastStore, MemorySnapshotStore, ScriptedGame, ScriptedQuestion};
    use std::time::Duration;

    fn digest_of(name: &str) -> ImageDigest {
        ImageDigest::of(&portrait(name))
    }

    async fn cache_knowing(names: &[&str]) -> Arc<LabelCache> {
        let cache = LabelCache::new(LabelStorage::new(Box::new(MemorySnapshotStore::default())));
        for name in names {
            cache.upsert(digest_of(name), name).await;
        }
        Arc::new(cache)
    }

    fn game_with(names: &[&str]) -> (ScriptedGame, Vec<QuestionId>) {
        let game = ScriptedGame::new(500);
        let ids = game.push_session(
            names
                .iter()
                .map(|name| ScriptedQuestion::new(name, &["Decoy"]))
                .collect(),
        );
        (game, ids)
    }

    fn precacher(game: &ScriptedGame, cache: Arc<LabelCache>, concurrency: usize) -> Precacher {
        Precacher::new(Arc::new(game.clone()), cache, concurrency, RetryConfig::none())
    }

    #[tokio::test]
    async fn test_precache_covers_every_slot() {
        let (game, ids) = game_with(&["Alice", "Bob", "Carol", "Dave", "Erin"]);
        let cache = cache_knowing(&["Bob", "Erin"]).await;
        let cancel = CancellationToken::new();

        // Two slots past the end of the script have no picture at all
        let map = precacher(&game, cache, 3)
            .precache("game-x", ids[0], 7, &cancel)
            .await
            .unwrap();

        assert_eq!(map.len(), 7);
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), (500..507).collect::<Vec<_>>());
        assert_eq!(map[&501].resolution, Resolution::Resolved("Bob".into()));
        assert_eq!(map[&504].resolution, Resolution::Resolved("Erin".into()));
        assert_eq!(map[&500].digest, Some(digest_of("Alice")));
        assert_eq!(map[&500].resolution, Resolution::Unresolved);
        assert_eq!(map[&505], PrecacheEntry::failed(505));
        assert_eq!(map[&506], PrecacheEntry::failed(506));
    }

    #[tokio::test]
    async fn test_failed_fetch_yields_unresolved_entry() {
        let (game, ids) = game_with(&["Alice", "Bob"]);
        game.hide_image(ids[1]);
        let cache = cache_knowing(&["Alice", "Bob"]).await;

        let map = precacher(&game, cache, 2)
            .precache("game-x", ids[0], 2, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(map[&ids[0]].resolution, Resolution::Resolved("Alice".into()));
        assert_eq!(map[&ids[1]].digest, None);
        assert_eq!(map[&ids[1]].resolution, Resolution::Unresolved);
    }

    #[tokio::test]
    async fn test_completion_order_does_not_change_result() {
        let names = ["Alice", "Bob", "Carol", "Dave"];
        let (in_order, ids) = game_with(&names);
        let (reversed, _) = game_with(&names);
        for (i, id) in ids.iter().enumerate() {
            reversed.delay_image(*id, 40 - 10 * i as u64);
        }
        let cache = cache_knowing(&["Alice", "Carol"]).await;
        let cancel = CancellationToken::new();

        let a = precacher(&in_order, Arc::clone(&cache), 4)
            .precache("g", ids[0], 4, &cancel)
            .await
            .unwrap();
        let b = precacher(&reversed, Arc::clone(&cache), 4)
            .precache("g", ids[0], 4, &cancel)
            .await
            .unwrap();
        let serial = precacher(&reversed, cache, 1)
            .precache("g", ids[0], 4, &cancel)
            .await
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(a, serial);
    }

    #[tokio::test]
    async fn test_misses_resolved_against_fast_store_in_one_batch() {
        let (game, ids) = game_with(&["Alice", "Bob", "Carol"]);
        let fast = MemoryFastStore::default();
        fast.seed(&[
            LabelRecord::new(digest_of("Bob"), "Bob"),
            LabelRecord::new(digest_of("Carol"), "Carol"),
        ]);
        let cache = Arc::new(LabelCache::new(
            LabelStorage::new(Box::new(MemorySnapshotStore::default()))
                .with_fast_store(Box::new(fast.clone())),
        ));

        let map = precacher(&game, Arc::clone(&cache), 3)
            .precache("g", ids[0], 3, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fast.get_calls(), 1);
        assert_eq!(map[&ids[0]].resolution, Resolution::Unresolved);
        assert_eq!(map[&ids[1]].resolution, Resolution::Resolved("Bob".into()));
        assert_eq!(map[&ids[2]].resolution, Resolution::Resolved("Carol".into()));
        assert_eq!(cache.lookup_by_digest(&digest_of("Carol")).await.as_deref(), Some("Carol"));
    }

    #[tokio::test]
    async fn test_cancellation_abandons_in_flight_fetches() {
        let (game, ids) = game_with(&["Alice", "Bob"]);
        for id in &ids {
            game.delay_image(*id, 30_000);
        }
        let cache = cache_knowing(&[]).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            precacher(&game, cache, 2).precache("g", ids[0], 2, &cancel),
        )
        .await
        .expect("precache should stop promptly on cancellation");

        assert_eq!(result, Err(FacesError::Cancelled));
    }

    #[tokio::test]
    async fn test_resolve_one() {
        let (game, ids) = game_with(&["Alice", "Bob"]);
        let cache = cache_knowing(&["Bob"]).await;
        let precacher = precacher(&game, cache, 1);
        let cancel = CancellationToken::new();

        let (digest, resolution) = precacher.resolve_one("g", ids[1], &cancel).await.unwrap();
        assert_eq!(digest, digest_of("Bob"));
        assert_eq!(resolution, Resolution::Resolved("Bob".into()));

        let (_, resolution) = precacher.resolve_one("g", ids[0], &cancel).await.unwrap();
        assert_eq!(resolution, Resolution::Unresolved);

        assert!(matches!(
            precacher.resolve_one("g", 9999, &cancel).await,
            Err(FacesError::NotFound(_))
        ));
    }
}
