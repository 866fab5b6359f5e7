//! ============================================================================
//! Core Types for the Faces Solver
//! ============================================================================
//! Questions, answers, precache entries, statistics and the error taxonomy.
//! Report types are serialized to JSON for the CLI and any front-end.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::digest::ImageDigest;

/// Identifier of a game session as issued by the remote service
pub type GameId = String;

/// Question identifiers are global and monotonically increasing on the remote side
pub type QuestionId = u64;

pub type SuggestionId = u64;

// ============================================================================
// Game Types
// ============================================================================

/// One answer choice offered for a question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: SuggestionId,
    /// Display name of the person
    #[serde(alias = "value")]
    pub name: String,
}

impl Suggestion {
    pub fn new(id: SuggestionId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A question as returned by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    /// Image location, when the service discloses one
    #[serde(default, alias = "imageUrl", alias = "pictureUrl")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
}

impl Question {
    /// Name of the suggestion with the given id, if offered
    pub fn suggestion_name(&self, id: SuggestionId) -> Option<&str> {
        self.suggestions
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.name.as_str())
    }
}

/// Server verdict after submitting an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOutcome {
    pub correct: bool,
    pub correct_suggestion_id: Option<SuggestionId>,
    /// Disclosed name, when the service sends it directly
    pub correct_name: Option<String>,
    pub score: i64,
}

impl AnswerOutcome {
    /// Resolve the disclosed correct name, falling back to the question's suggestions
    pub fn disclosed_name(&self, question: &Question) -> Option<String> {
        if let Some(name) = self.correct_name.as_deref().map(str::trim) {
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
        self.correct_suggestion_id
            .and_then(|id| question.suggestion_name(id))
            .map(str::to_string)
    }
}

// ============================================================================
// Precache Types
// ============================================================================

/// Outcome of looking a digest up in the label cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "name", rename_all = "snake_case")]
pub enum Resolution {
    Resolved(String),
    Unresolved,
}

impl Resolution {
    pub fn from_lookup(name: Option<String>) -> Self {
        match name {
            Some(name) => Resolution::Resolved(name),
            None => Resolution::Unresolved,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Resolution::Resolved(name) => Some(name),
            Resolution::Unresolved => None,
        }
    }
}

/// Precache result for one question slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheEntry {
    pub question_id: QuestionId,
    /// None when the image could not be fetched
    pub digest: Option<ImageDigest>,
    pub resolution: Resolution,
}

impl PrecacheEntry {
    pub fn failed(question_id: QuestionId) -> Self {
        Self {
            question_id,
            digest: None,
            resolution: Resolution::Unresolved,
        }
    }
}

/// Precache results keyed by question id
pub type PrecacheMap = BTreeMap<QuestionId, PrecacheEntry>;

// ============================================================================
// Statistics
// ============================================================================

/// Counters for one scored session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub game_id: GameId,
    pub score: i64,
    pub correct: u32,
    pub total: u32,
    /// Submissions that kept failing after retries (scored zero)
    pub failed_submissions: u32,
    /// Questions skipped because the response shape was unusable
    pub protocol_errors: u32,
    /// Labels written back into the cache
    pub learned: u32,
    /// Questions answered from a cache hit
    pub cache_hits: u32,
}

impl SessionStats {
    pub fn new(game_id: impl Into<GameId>) -> Self {
        Self {
            game_id: game_id.into(),
            ..Default::default()
        }
    }

    pub fn accuracy(&self) -> f64 {
        accuracy(self.correct, self.total)
    }
}

/// Aggregate over every scored session in a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub sessions: Vec<SessionStats>,
}

impl RunStats {
    pub fn record(&mut self, session: SessionStats) {
        self.sessions.push(session);
    }

    pub fn total_score(&self) -> i64 {
        self.sessions.iter().map(|s| s.score).sum()
    }

    /// Best single-session score, 0 when no session completed
    pub fn best_score(&self) -> i64 {
        self.sessions.iter().map(|s| s.score).max().unwrap_or(0)
    }

    pub fn correct(&self) -> u32 {
        self.sessions.iter().map(|s| s.correct).sum()
    }

    pub fn total(&self) -> u32 {
        self.sessions.iter().map(|s| s.total).sum()
    }

    pub fn accuracy(&self) -> f64 {
        accuracy(self.correct(), self.total())
    }
}

/// correct / total, or 0 when nothing was answered
pub fn accuracy(correct: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        f64::from(correct) / f64::from(total)
    }
}

/// Everything a front-end needs after a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub total_score: i64,
    pub best_score: i64,
    /// Fraction in [0, 1]
    pub accuracy: f64,
    pub correct_guesses: u32,
    pub total_guesses: u32,
    pub known_label_count: usize,
    pub sessions: Vec<SessionStats>,
    /// False when the final save failed and learned labels were not written
    pub persisted: bool,
    pub cancelled: bool,
    pub log_lines: Vec<String>,
}

impl RunReport {
    pub fn from_stats(stats: &RunStats, known_label_count: usize) -> Self {
        Self {
            total_score: stats.total_score(),
            best_score: stats.best_score(),
            accuracy: stats.accuracy(),
            correct_guesses: stats.correct(),
            total_guesses: stats.total(),
            known_label_count,
            sessions: stats.sessions.clone(),
            persisted: false,
            cancelled: false,
            log_lines: Vec::new(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error taxonomy for the solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum FacesError {
    #[error("Credentials rejected by the game service")]
    AuthExpired,

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unexpected response: {0}")]
    ProtocolMismatch(String),

    #[error("Label snapshot unreadable: {0}")]
    CacheCorruption(String),

    #[error("Failed to persist labels: {0}")]
    StorageWriteFailure(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl FacesError {
    /// Errors that end the whole run rather than a single question
    pub fn is_fatal(&self) -> bool {
        matches!(self, FacesError::AuthExpired | FacesError::Cancelled)
    }
}

pub type FacesResult<T> = std::result::Result<T, FacesError>;

/// Run-level failure, carrying whatever was achieved before it
#[derive(Debug, Clone, thiserror::Error)]
#[error("Run aborted: {error}")]
pub struct RunAborted {
    pub error: FacesError,
    pub report: RunReport,
}
