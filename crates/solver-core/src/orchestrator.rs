//! ============================================================================
//! Game Orchestrator - Scored sessions from start to finish
//! ============================================================================
//! Per run:
//! 1. Discover the question id offset (unless a start id is configured)
//! 2. For each session: create game → precache → answer every question
//! 3. Learn the disclosed answer after each submission
//! 4. Save the label cache after each session and when the run ends
//!
//! The scored loop is strictly sequential. Only `AuthExpired` and a game
//! that cannot be created end the run early; everything else degrades to a
//! default guess, a zero-score question or a skipped slot.
//! ============================================================================

use anyhow::anyhow;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{Credentials, GameApi, HttpGameApi};
use crate::bootstrap::discover_offset;
use crate::cache::{LabelCache, LabelStorage, LoadReport};
use crate::config::SolverConfig;
use crate::digest::ImageDigest;
use crate::precache::Precacher;
use crate::retry::with_retry;
use crate::runlog::RunLog;
use crate::selector::select_answer;
use crate::types::{
    FacesError, FacesResult, PrecacheMap, QuestionId, Resolution, RunAborted, RunReport,
    RunStats, SessionStats,
};

/// Where the current session stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Created,
    Precached,
    /// Zero-based index of the question being answered
    Answering(u32),
    Completed,
}

/// A session that was created; `interrupted` is set when it ended early
struct SessionRun {
    stats: SessionStats,
    interrupted: Option<FacesError>,
}

pub struct Orchestrator {
    api: Arc<dyn GameApi>,
    cache: Arc<LabelCache>,
    precacher: Precacher,
    config: SolverConfig,
    /// Predicted first question id of the next session
    next_start: Option<QuestionId>,
    precache_enabled: bool,
    phase: SessionPhase,
}

impl Orchestrator {
    pub fn new(api: Arc<dyn GameApi>, cache: Arc<LabelCache>, config: SolverConfig) -> Self {
        let precacher = Precacher::new(
            Arc::clone(&api),
            Arc::clone(&cache),
            config.precache_concurrency,
            config.retry.clone(),
        );
        Self {
            next_start: config.start_question_id,
            api,
            cache,
            precacher,
            config,
            precache_enabled: true,
            phase: SessionPhase::Idle,
        }
    }

    /// Wire the live HTTP client and the configured storage, then load the
    /// label snapshot
    pub async fn connect(
        config: SolverConfig,
        credentials: &Credentials,
    ) -> anyhow::Result<(Self, LoadReport)> {
        config.validate()?;
        let api = HttpGameApi::new(
            &config.base_url,
            credentials,
            Duration::from_millis(config.request_timeout_ms),
        )?;
        let storage = LabelStorage::open(&config.data_path, config.store_path.as_deref());
        let cache = Arc::new(LabelCache::new(storage));
        let loaded = cache.load().await;
        Ok((Self::new(Arc::new(api), cache, config), loaded))
    }

    pub fn cache(&self) -> &Arc<LabelCache> {
        &self.cache
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn predicted_start(&self) -> Option<QuestionId> {
        self.next_start
    }

    /// Play `session_count` scored sessions
    pub async fn run_sequence(
        &mut self,
        session_count: u32,
        cancel: &CancellationToken,
    ) -> Result<RunReport, RunAborted> {
        let mut log = RunLog::new();
        let mut stats = RunStats::default();
        log.info(format!(
            "Starting {} session(s), {} labels known",
            session_count,
            self.cache.len().await
        ));

        if self.next_start.is_none() && self.precache_enabled {
            match discover_offset(
                self.api.as_ref(),
                self.config.questions_per_session,
                &self.config.retry,
                cancel,
            )
            .await
            {
                Ok(discovery) => {
                    self.next_start = Some(discovery.offset());
                    log.info(format!(
                        "Bootstrap: next game should start at question {}",
                        discovery.offset()
                    ));
                }
                Err(FacesError::Cancelled) => {
                    return Ok(self.finish(stats, log, true).await);
                }
                Err(FacesError::AuthExpired) => {
                    log.warn("Bootstrap rejected: credentials expired");
                    return Err(self.abort(FacesError::AuthExpired, stats, log).await);
                }
                Err(e) => {
                    self.precache_enabled = false;
                    log.warn(format!(
                        "Bootstrap failed ({}), resolving pictures question by question",
                        e
                    ));
                }
            }
        }

        let mut cancelled = false;
        for index in 1..=session_count {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let run = match self.play_session(index, &mut log, cancel).await {
                Ok(run) => run,
                Err(FacesError::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(e) => {
                    log.warn(format!("Session {}: could not start a game: {}", index, e));
                    return Err(self.abort(e, stats, log).await);
                }
            };

            log.info(format!(
                "Session {}: score {}, {}/{} correct, {} learned",
                index, run.stats.score, run.stats.correct, run.stats.total, run.stats.learned
            ));
            stats.record(run.stats);
            self.save(&mut log).await;

            match run.interrupted {
                None => {}
                Some(FacesError::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Some(e) if e.is_fatal() => {
                    return Err(self.abort(e, stats, log).await);
                }
                Some(_) => {}
            }
        }

        Ok(self.finish(stats, log, cancelled).await)
    }

    /// `run_sequence` for callers without a runtime. Starts its own
    /// current-thread runtime, so it refuses to run inside an existing one;
    /// async callers use `run_sequence` directly.
    pub fn run_sequence_blocking(
        &mut self,
        session_count: u32,
        cancel: &CancellationToken,
    ) -> anyhow::Result<RunReport> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(anyhow!(
                "run_sequence_blocking called from inside an async runtime; await run_sequence instead"
            ));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| anyhow!("Failed to start async runtime: {}", e))?;
        runtime
            .block_on(self.run_sequence(session_count, cancel))
            .map_err(anyhow::Error::from)
    }

    // ===== Session =====

    /// Errors only when the game could not be created
    async fn play_session(
        &mut self,
        index: u32,
        log: &mut RunLog,
        cancel: &CancellationToken,
    ) -> FacesResult<SessionRun> {
        let api = Arc::clone(&self.api);
        let retry = self.config.retry.clone();
        let count = self.config.questions_per_session;

        let game_id = with_retry(&retry, "create game", cancel, || api.create_session()).await?;
        self.enter(SessionPhase::Created);
        log.info(format!("Session {}: game {}", index, game_id));

        let mut session = SessionStats::new(&game_id);
        let mut precached = PrecacheMap::new();

        if let (true, Some(start)) = (self.precache_enabled, self.next_start) {
            match self.precacher.precache(&game_id, start, count, cancel).await {
                Ok(map) => precached = map,
                Err(e) => {
                    return Ok(SessionRun {
                        stats: session,
                        interrupted: Some(e),
                    })
                }
            }
        }
        self.enter(SessionPhase::Precached);

        let mut interrupted = None;
        let mut answered_since_save = 0;

        for i in 0..count {
            if i > 0 && self.config.question_delay_ms > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_millis(self.config.question_delay_ms)) => {}
                }
            }
            if cancel.is_cancelled() {
                interrupted = Some(FacesError::Cancelled);
                break;
            }
            self.enter(SessionPhase::Answering(i));

            let question =
                match with_retry(&retry, "next question", cancel, || api.next_question(&game_id))
                    .await
                {
                    Ok(question) => question,
                    Err(e) if e.is_fatal() => {
                        interrupted = Some(e);
                        break;
                    }
                    Err(e) => {
                        session.protocol_errors += 1;
                        // The slot still used up one question id
                        if let Some(next) = self.next_start.as_mut() {
                            *next += 1;
                        }
                        log.warn(format!(
                            "Session {}: question {} unreadable ({}), skipped",
                            index,
                            i + 1,
                            e
                        ));
                        continue;
                    }
                };

            if let Some(expected) = self.next_start {
                if expected != question.id {
                    log.warn(format!(
                        "Session {}: expected question {} but got {}, re-anchoring",
                        index, expected, question.id
                    ));
                }
            }
            self.next_start = Some(question.id + 1);

            let precached_entry = precached
                .get(&question.id)
                .and_then(|entry| entry.digest.map(|d| (d, entry.resolution.clone())));
            let (digest, resolution): (Option<ImageDigest>, Resolution) = match precached_entry {
                Some((digest, resolution)) => (Some(digest), resolution),
                None => match self.precacher.resolve_one(&game_id, question.id, cancel).await {
                    Ok((digest, resolution)) => (Some(digest), resolution),
                    Err(e) if e.is_fatal() => {
                        interrupted = Some(e);
                        break;
                    }
                    Err(e) => {
                        log.warn(format!("Question {}: no picture ({})", question.id, e));
                        (None, Resolution::Unresolved)
                    }
                },
            };

            let Some(selection) = select_answer(&question.suggestions, &resolution) else {
                session.protocol_errors += 1;
                log.warn(format!(
                    "Question {}: {}",
                    question.id,
                    FacesError::ProtocolMismatch("no suggestions offered".into())
                ));
                continue;
            };
            if selection.matched {
                session.cache_hits += 1;
            }

            let question_id = question.id;
            let suggestion_id = selection.suggestion_id;
            let outcome = match with_retry(&retry, "submit answer", cancel, || {
                api.submit_answer(&game_id, question_id, suggestion_id)
            })
            .await
            {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => {
                    interrupted = Some(e);
                    break;
                }
                Err(e) => {
                    session.total += 1;
                    session.failed_submissions += 1;
                    log.warn(format!(
                        "Question {}: answer not accepted ({}), scored zero",
                        question_id, e
                    ));
                    continue;
                }
            };

            session.total += 1;
            let correct =
                outcome.correct || outcome.correct_suggestion_id == Some(selection.suggestion_id);
            if correct {
                session.correct += 1;
            }
            session.score += outcome.score;

            let answer = outcome.disclosed_name(&question);
            if let (Some(digest), Some(name)) = (digest, answer.as_deref()) {
                if self.cache.upsert(digest, name).await.changed() {
                    session.learned += 1;
                }
            }

            log.info(format!(
                "Q{} #{}: guessed '{}' {} answer '{}' (+{})",
                i + 1,
                question_id,
                question.suggestion_name(suggestion_id).unwrap_or("?"),
                if correct { "✓" } else { "✗" },
                answer.as_deref().unwrap_or("?"),
                outcome.score
            ));

            answered_since_save += 1;
            if let Some(every) = self.config.checkpoint_every {
                if answered_since_save >= every {
                    answered_since_save = 0;
                    if let Err(e) = self.cache.save_if_dirty().await {
                        log.warn(format!("Checkpoint save failed: {}", e));
                    }
                }
            }
        }

        self.enter(SessionPhase::Completed);
        Ok(SessionRun {
            stats: session,
            interrupted,
        })
    }

    fn enter(&mut self, phase: SessionPhase) {
        debug!("Session phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    // ===== Run end =====

    /// Save when dirty; false when the write failed
    async fn save(&self, log: &mut RunLog) -> bool {
        match self.cache.save_if_dirty().await {
            Ok(_) => true,
            Err(e) => {
                log.warn(format!("Saving labels failed: {}", e));
                false
            }
        }
    }

    async fn finish(&self, stats: RunStats, mut log: RunLog, cancelled: bool) -> RunReport {
        let persisted = self.save(&mut log).await;
        if cancelled {
            log.warn("Run cancelled");
        }
        let known = self.cache.len().await;
        log.info(format!(
            "Run finished: score {}, {}/{} correct ({:.1}%), {} labels known",
            stats.total_score(),
            stats.correct(),
            stats.total(),
            stats.accuracy() * 100.0,
            known
        ));

        RunReport {
            persisted,
            cancelled,
            log_lines: log.into_lines(),
            ..RunReport::from_stats(&stats, known)
        }
    }

    async fn abort(&self, error: FacesError, stats: RunStats, log: RunLog) -> RunAborted {
        let mut report = self.finish(stats, log, false).await;
        report.log_lines.push(format!("Run aborted: {}", error));
        RunAborted { error, report }
    }
}
