//! ============================================================================
//! Solver Configuration
//! ============================================================================
//! Defaults suit the live game; every knob can be overridden from the
//! environment (a `.env` file is loaded by the CLI) or from CLI flags.
//! ============================================================================

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::str::FromStr;

use crate::retry::RetryConfig;

/// Default game host
pub const DEFAULT_BASE_URL: &str = "https://aramis.ilucca.net";

/// Questions in one game
pub const DEFAULT_QUESTIONS_PER_SESSION: u32 = 10;

/// Runtime configuration for a solver run
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Scheme and host of the game service
    pub base_url: String,
    pub questions_per_session: u32,
    /// Ceiling on simultaneous picture downloads while precaching
    pub precache_concurrency: usize,
    /// Timeout applied to every HTTP call
    pub request_timeout_ms: u64,
    /// Pause between questions of the scored loop
    pub question_delay_ms: u64,
    /// Save the cache after this many answered questions (None = end of session only)
    pub checkpoint_every: Option<u32>,
    /// Known first question id; skips the bootstrap game when set
    pub start_question_id: Option<u64>,
    pub retry: RetryConfig,
    /// Durable snapshot location
    pub data_path: PathBuf,
    /// Fast store location; None disables the fast store
    pub store_path: Option<PathBuf>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        let dir = dirs::home_dir()
            .map(|home| home.join(".faces"))
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            questions_per_session: DEFAULT_QUESTIONS_PER_SESSION,
            precache_concurrency: 4,
            request_timeout_ms: 10_000,
            question_delay_ms: 300,
            checkpoint_every: None,
            start_question_id: None,
            retry: RetryConfig::default(),
            data_path: dir.join("faces_data.json"),
            store_path: Some(dir.join("labels.redb")),
        }
    }
}

impl SolverConfig {
    /// Defaults overridden by FACES_* environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = env_var("FACES_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(path) = env_var("FACES_DATA_PATH") {
            config.data_path = PathBuf::from(path);
        }
        if let Some(path) = env_var("FACES_STORE_PATH") {
            config.store_path = match path.as_str() {
                "" | "none" | "off" => None,
                _ => Some(PathBuf::from(path)),
            };
        }
        if let Some(n) = env_parse::<u32>("FACES_QUESTIONS_PER_SESSION")? {
            config.questions_per_session = n;
        }
        if let Some(n) = env_parse::<usize>("FACES_PRECACHE_CONCURRENCY")? {
            config.precache_concurrency = n;
        }
        if let Some(ms) = env_parse::<u64>("FACES_REQUEST_TIMEOUT_MS")? {
            config.request_timeout_ms = ms;
        }
        if let Some(ms) = env_parse::<u64>("FACES_QUESTION_DELAY_MS")? {
            config.question_delay_ms = ms;
        }
        if let Some(n) = env_parse::<u32>("FACES_CHECKPOINT_EVERY")? {
            config.checkpoint_every = (n > 0).then_some(n);
        }
        if let Some(id) = env_parse::<u64>("FACES_START_QUESTION_ID")? {
            config.start_question_id = Some(id);
        }
        if let Some(n) = env_parse::<u32>("FACES_MAX_ATTEMPTS")? {
            config.retry.max_attempts = n.max(1);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.questions_per_session == 0 {
            return Err(anyhow!("questions_per_session must be at least 1"));
        }
        if self.precache_concurrency == 0 {
            return Err(anyhow!("precache_concurrency must be at least 1"));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(anyhow!("base_url must be an http(s) URL: {}", self.base_url));
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(key) {
        None => Ok(None),
        Some(raw) if raw.is_empty() => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("Invalid {}='{}': {}", key, raw, e)),
    }
}
