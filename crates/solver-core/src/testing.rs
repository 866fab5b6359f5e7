//! In-memory doubles shared by the unit tests: snapshot and fast stores, and
//! a scripted game service.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::GameApi;
use crate::cache::{FastStore, LabelRecord, SnapshotStore};
use crate::digest::ImageDigest;
use crate::types::{
    AnswerOutcome, FacesError, FacesResult, GameId, Question, QuestionId, Suggestion,
    SuggestionId,
};

// ===== Snapshot store =====

#[derive(Default)]
struct SnapshotState {
    records: Vec<LabelRecord>,
    write_calls: usize,
    fail_writes: bool,
    /// Sleep before the next write lands
    next_write_delay: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct MemorySnapshotStore {
    state: Arc<Mutex<SnapshotState>>,
}

impl MemorySnapshotStore {
    pub fn failing_writes() -> Self {
        let store = Self::default();
        store.state.lock().unwrap().fail_writes = true;
        store
    }

    pub fn delay_next_write(&self, millis: u64) {
        self.state.lock().unwrap().next_write_delay = Some(Duration::from_millis(millis));
    }

    pub fn records(&self) -> Vec<LabelRecord> {
        self.state.lock().unwrap().records.clone()
    }

    pub fn write_calls(&self) -> usize {
        self.state.lock().unwrap().write_calls
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn read_all(&self) -> Result<Vec<LabelRecord>> {
        Ok(self.state.lock().unwrap().records.clone())
    }

    fn write_all(&self, records: &[LabelRecord]) -> Result<()> {
        // Runs on a blocking thread, so a plain sleep stands in for slow disk
        let delay = self.state.lock().unwrap().next_write_delay.take();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(anyhow!("disk full"));
        }
        state.write_calls += 1;
        let mut records = records.to_vec();
        records.sort();
        state.records = records;
        Ok(())
    }
}

// ===== Fast store =====

#[derive(Default)]
struct FastState {
    labels: HashMap<ImageDigest, String>,
    get_calls: usize,
    set_calls: usize,
    failing: bool,
}

#[derive(Clone, Default)]
pub struct MemoryFastStore {
    state: Arc<Mutex<FastState>>,
}

impl MemoryFastStore {
    pub fn failing() -> Self {
        let store = Self::default();
        store.state.lock().unwrap().failing = true;
        store
    }

    pub fn seed(&self, records: &[LabelRecord]) {
        let mut state = self.state.lock().unwrap();
        for record in records {
            state.labels.insert(record.digest, record.name.clone());
        }
    }

    pub fn get_calls(&self) -> usize {
        self.state.lock().unwrap().get_calls
    }

    pub fn set_calls(&self) -> usize {
        self.state.lock().unwrap().set_calls
    }

    pub fn len_now(&self) -> usize {
        self.state.lock().unwrap().labels.len()
    }
}

impl FastStore for MemoryFastStore {
    fn batch_get(&self, digests: &[ImageDigest]) -> Result<HashMap<ImageDigest, String>> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(anyhow!("connection refused"));
        }
        state.get_calls += 1;
        Ok(digests
            .iter()
            .filter_map(|d| state.labels.get(d).map(|name| (*d, name.clone())))
            .collect())
    }

    fn batch_set(&self, records: &[LabelRecord]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(anyhow!("connection refused"));
        }
        state.set_calls += 1;
        for record in records {
            state.labels.insert(record.digest, record.name.clone());
        }
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().labels.len() as u64)
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(anyhow!("connection refused"));
        }
        state.labels.clear();
        Ok(())
    }
}

// ===== Scripted game =====

/// Picture bytes for a person; equal names give equal digests
pub fn portrait(name: &str) -> Vec<u8> {
    format!("portrait of {}", name).into_bytes()
}

/// One scripted question. Decoys are offered first, so the default guess
/// is wrong unless there are no decoys.
#[derive(Debug, Clone)]
pub struct ScriptedQuestion {
    pub image: Vec<u8>,
    pub suggestions: Vec<Suggestion>,
    pub correct_id: SuggestionId,
    pub points: i64,
}

impl ScriptedQuestion {
    pub fn new(person: &str, decoys: &[&str]) -> Self {
        let mut suggestions: Vec<Suggestion> = decoys
            .iter()
            .enumerate()
            .map(|(i, name)| Suggestion::new(i as SuggestionId + 1, *name))
            .collect();
        let correct_id = suggestions.len() as SuggestionId + 1;
        suggestions.push(Suggestion::new(correct_id, person));
        Self {
            image: portrait(person),
            suggestions,
            correct_id,
            points: 100,
        }
    }

    pub fn without_suggestions(person: &str) -> Self {
        Self {
            suggestions: Vec::new(),
            correct_id: 0,
            ..Self::new(person, &[])
        }
    }
}

#[derive(Default)]
struct GameState {
    next_id: QuestionId,
    /// Scripts waiting for `create_session`, with ids already assigned
    pending: VecDeque<Vec<QuestionId>>,
    questions: HashMap<QuestionId, ScriptedQuestion>,
    games: HashMap<GameId, VecDeque<QuestionId>>,
    created: usize,
    submissions: Vec<(QuestionId, SuggestionId)>,
    image_fetches: usize,
    failing_submits: u32,
    failing_creates: u32,
    missing_images: HashSet<QuestionId>,
    garbled_questions: HashSet<QuestionId>,
    image_delays: HashMap<QuestionId, u64>,
    disclose_names: bool,
    auth_expired: bool,
}

/// Game service double. Question ids are global and assigned when a
/// session script is pushed, like the live service.
#[derive(Clone)]
pub struct ScriptedGame {
    state: Arc<Mutex<GameState>>,
}

impl ScriptedGame {
    pub fn new(first_question_id: QuestionId) -> Self {
        Self {
            state: Arc::new(Mutex::new(GameState {
                next_id: first_question_id,
                ..Default::default()
            })),
        }
    }

    /// Queue the questions of the next session to be created
    pub fn push_session(&self, questions: Vec<ScriptedQuestion>) -> Vec<QuestionId> {
        let mut state = self.state.lock().unwrap();
        let mut ids = Vec::with_capacity(questions.len());
        for question in questions {
            let id = state.next_id;
            state.next_id += 1;
            state.questions.insert(id, question);
            ids.push(id);
        }
        state.pending.push_back(ids.clone());
        ids
    }

    /// Burn ids as other players would
    pub fn skip_ids(&self, count: u64) {
        self.state.lock().unwrap().next_id += count;
    }

    pub fn fail_next_submits(&self, count: u32) {
        self.state.lock().unwrap().failing_submits = count;
    }

    pub fn fail_next_creates(&self, count: u32) {
        self.state.lock().unwrap().failing_creates = count;
    }

    pub fn hide_image(&self, question_id: QuestionId) {
        self.state.lock().unwrap().missing_images.insert(question_id);
    }

    /// Serve this question as an unparseable payload; its slot is used up
    pub fn garble_question(&self, question_id: QuestionId) {
        self.state
            .lock()
            .unwrap()
            .garbled_questions
            .insert(question_id);
    }

    pub fn delay_image(&self, question_id: QuestionId, millis: u64) {
        self.state
            .lock()
            .unwrap()
            .image_delays
            .insert(question_id, millis);
    }

    /// Send `correctAnswer` alongside the correct suggestion id
    pub fn disclose_names(&self) {
        self.state.lock().unwrap().disclose_names = true;
    }

    pub fn expire_auth(&self) {
        self.state.lock().unwrap().auth_expired = true;
    }

    pub fn sessions_created(&self) -> usize {
        self.state.lock().unwrap().created
    }

    pub fn image_fetches(&self) -> usize {
        self.state.lock().unwrap().image_fetches
    }

    pub fn submissions(&self) -> Vec<(QuestionId, SuggestionId)> {
        self.state.lock().unwrap().submissions.clone()
    }
}

#[async_trait]
impl GameApi for ScriptedGame {
    async fn create_session(&self) -> FacesResult<GameId> {
        let mut state = self.state.lock().unwrap();
        if state.auth_expired {
            return Err(FacesError::AuthExpired);
        }
        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(FacesError::NetworkFailure("service unavailable".into()));
        }
        let ids = state
            .pending
            .pop_front()
            .ok_or_else(|| FacesError::NetworkFailure("no scripted session left".into()))?;
        state.created += 1;
        let game_id = format!("game-{}", state.created);
        state.games.insert(game_id.clone(), ids.into());
        Ok(game_id)
    }

    async fn fetch_image(&self, _game_id: &str, question_id: QuestionId) -> FacesResult<Vec<u8>> {
        let (image, delay) = {
            let mut state = self.state.lock().unwrap();
            if state.auth_expired {
                return Err(FacesError::AuthExpired);
            }
            state.image_fetches += 1;
            if state.missing_images.contains(&question_id) {
                return Err(FacesError::NotFound(format!("picture {}", question_id)));
            }
            let image = state
                .questions
                .get(&question_id)
                .map(|q| q.image.clone())
                .ok_or_else(|| FacesError::NotFound(format!("question {}", question_id)))?;
            (image, state.image_delays.get(&question_id).copied())
        };

        if let Some(millis) = delay {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
        Ok(image)
    }

    async fn next_question(&self, game_id: &str) -> FacesResult<Question> {
        let mut state = self.state.lock().unwrap();
        if state.auth_expired {
            return Err(FacesError::AuthExpired);
        }
        let id = state
            .games
            .get_mut(game_id)
            .ok_or_else(|| FacesError::NotFound(format!("game {}", game_id)))?
            .pop_front()
            .ok_or_else(|| FacesError::ProtocolMismatch("game is over".into()))?;
        if state.garbled_questions.contains(&id) {
            return Err(FacesError::ProtocolMismatch(format!(
                "question {} has no suggestions field",
                id
            )));
        }
        let question = &state.questions[&id];
        Ok(Question {
            id,
            image_url: None,
            suggestions: question.suggestions.clone(),
        })
    }

    async fn submit_answer(
        &self,
        _game_id: &str,
        question_id: QuestionId,
        suggestion_id: SuggestionId,
    ) -> FacesResult<AnswerOutcome> {
        let mut state = self.state.lock().unwrap();
        if state.auth_expired {
            return Err(FacesError::AuthExpired);
        }
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(FacesError::NetworkFailure("connection reset".into()));
        }
        state.submissions.push((question_id, suggestion_id));

        let question = state
            .questions
            .get(&question_id)
            .ok_or_else(|| FacesError::NotFound(format!("question {}", question_id)))?;
        let correct = suggestion_id == question.correct_id;
        let correct_name = if state.disclose_names {
            question
                .suggestions
                .iter()
                .find(|s| s.id == question.correct_id)
                .map(|s| s.name.clone())
        } else {
            None
        };
        Ok(AnswerOutcome {
            correct,
            correct_suggestion_id: Some(question.correct_id),
            correct_name,
            score: if correct { question.points } else { 0 },
        })
    }
}
