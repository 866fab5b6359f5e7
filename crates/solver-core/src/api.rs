//! ============================================================================
//! Game API - Remote faces game, behind a trait
//! ============================================================================
//! `GameApi` is what the bootstrap, precache and orchestrator talk to.
//! `HttpGameApi` is the reqwest implementation for the live service:
//! - POST /faces/api/games                               create a game
//! - POST /faces/api/games/{g}/questions/next            next question
//! - GET  /faces/api/games/{g}/questions/{q}/picture     question picture
//! - POST /faces/api/games/{g}/questions/{q}/guess       submit an answer
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, COOKIE};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::types::{
    AnswerOutcome, FacesError, FacesResult, GameId, Question, QuestionId, SuggestionId,
};

/// Remote game operations used by the solver
#[async_trait]
pub trait GameApi: Send + Sync {
    /// Start a new game and return its id
    async fn create_session(&self) -> FacesResult<GameId>;

    /// Raw bytes of a question's picture
    async fn fetch_image(&self, game_id: &str, question_id: QuestionId) -> FacesResult<Vec<u8>>;

    /// Advance the game and return the next question
    async fn next_question(&self, game_id: &str) -> FacesResult<Question>;

    /// Answer a question; the response discloses the correct answer
    async fn submit_answer(
        &self,
        game_id: &str,
        question_id: QuestionId,
        suggestion_id: SuggestionId,
    ) -> FacesResult<AnswerOutcome>;
}

// ============================================================================
// Credentials
// ============================================================================

/// Request headers captured from a logged-in browser session
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    headers: Vec<(String, String)>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `Name: value` header line
    pub fn with_header_line(mut self, line: &str) -> Result<Self> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| anyhow!("Header must look like 'Name: value': {}", line))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("Header name is empty: {}", line));
        }
        self.headers.push((name.to_string(), value.trim().to_string()));
        Ok(self)
    }

    pub fn with_cookie(mut self, cookie: &str) -> Self {
        self.headers
            .push((COOKIE.as_str().to_string(), cookie.trim().to_string()));
        self
    }

    pub fn has_cookie(&self) -> bool {
        self.headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(COOKIE.as_str()))
    }

    fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| anyhow!("Invalid header name '{}': {}", name, e))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| anyhow!("Invalid value for header '{}': {}", name, e))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Client for the live game service
pub struct HttpGameApi {
    client: Client,
    base_url: String,
}

impl HttpGameApi {
    pub fn new(base_url: &str, credentials: &Credentials, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .default_headers(credentials.header_map()?)
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn games_url(&self) -> String {
        format!("{}/faces/api/games", self.base_url)
    }

    fn question_url(&self, game_id: &str, question_id: QuestionId, leaf: &str) -> String {
        format!(
            "{}/{}/questions/{}/{}",
            self.games_url(),
            game_id,
            question_id,
            leaf
        )
    }

    async fn post_guess(
        &self,
        url: &str,
        body: &GuessRequest,
    ) -> FacesResult<AnswerOutcome> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(send_error)?;
        let response = check_status(response, "guess").await?;
        let guess: GuessResponse = response
            .json()
            .await
            .map_err(|e| FacesError::ProtocolMismatch(format!("guess response: {}", e)))?;
        Ok(guess.into())
    }
}

#[async_trait]
impl GameApi for HttpGameApi {
    async fn create_session(&self) -> FacesResult<GameId> {
        let response = self
            .client
            .post(self.games_url())
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(send_error)?;
        let response = check_status(response, "create game").await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| FacesError::ProtocolMismatch(format!("create game response: {}", e)))?;

        let game_id = game_id_from(&body).ok_or_else(|| {
            FacesError::ProtocolMismatch(format!("no game id in response: {}", body))
        })?;
        info!("Created game {}", game_id);
        Ok(game_id)
    }

    async fn fetch_image(&self, game_id: &str, question_id: QuestionId) -> FacesResult<Vec<u8>> {
        let url = self.question_url(game_id, question_id, "picture");
        debug!("Fetching picture for question {}", question_id);

        let response = self
            .client
            .get(&url)
            .header(
                ACCEPT,
                "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8",
            )
            .send()
            .await
            .map_err(send_error)?;
        let response = check_status(response, "picture").await?;
        let bytes = response.bytes().await.map_err(send_error)?;

        if bytes.is_empty() {
            return Err(FacesError::ProtocolMismatch(format!(
                "empty picture for question {}",
                question_id
            )));
        }
        Ok(bytes.to_vec())
    }

    async fn next_question(&self, game_id: &str) -> FacesResult<Question> {
        let url = format!("{}/{}/questions/next", self.games_url(), game_id);
        let response = self
            .client
            .post(&url)
            .json(&NextQuestionRequest::default())
            .send()
            .await
            .map_err(send_error)?;
        let response = check_status(response, "next question").await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| FacesError::ProtocolMismatch(format!("next question response: {}", e)))?;

        serde_json::from_value(body)
            .map_err(|e| FacesError::ProtocolMismatch(format!("question shape: {}", e)))
    }

    async fn submit_answer(
        &self,
        game_id: &str,
        question_id: QuestionId,
        suggestion_id: SuggestionId,
    ) -> FacesResult<AnswerOutcome> {
        let body = GuessRequest {
            question_id,
            suggestion_id,
        };

        // The endpoint is `/guess` on current deployments and `/guesses` on older ones
        match self
            .post_guess(&self.question_url(game_id, question_id, "guess"), &body)
            .await
        {
            Err(FacesError::NotFound(_)) => {
                debug!("/guess not found, trying /guesses");
                self.post_guess(&self.question_url(game_id, question_id, "guesses"), &body)
                    .await
            }
            other => other,
        }
    }
}

/// Map a non-success status onto the error taxonomy
async fn check_status(response: Response, what: &str) -> FacesResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = format!("{} returned {}: {}", what, status, truncate(&body, 200));
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FacesError::AuthExpired,
        StatusCode::NOT_FOUND => FacesError::NotFound(detail),
        StatusCode::TOO_MANY_REQUESTS => FacesError::RateLimited(detail),
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
            FacesError::NetworkFailure(detail)
        }
        _ => FacesError::ProtocolMismatch(detail),
    })
}

fn send_error(e: reqwest::Error) -> FacesError {
    if e.is_timeout() {
        FacesError::NetworkFailure(format!("timed out: {}", e))
    } else {
        FacesError::NetworkFailure(e.to_string())
    }
}

/// The create-game response is either `{"id": ...}` or a bare id
fn game_id_from(body: &Value) -> Option<GameId> {
    let id = match body {
        Value::Object(map) => map.get("id")?,
        other => other,
    };
    match id {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Default, Serialize)]
struct NextQuestionRequest {
    establishments: Vec<String>,
    departments: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GuessRequest {
    question_id: QuestionId,
    suggestion_id: SuggestionId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GuessResponse {
    #[serde(default, alias = "correct")]
    is_correct: bool,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    correct_suggestion_id: Option<SuggestionId>,
    #[serde(default)]
    correct_answer: Option<String>,
}

impl From<GuessResponse> for AnswerOutcome {
    fn from(guess: GuessResponse) -> Self {
        AnswerOutcome {
            correct: guess.is_correct,
            correct_suggestion_id: guess.correct_suggestion_id,
            correct_name: guess.correct_answer,
            score: guess.score,
        }
    }
}
