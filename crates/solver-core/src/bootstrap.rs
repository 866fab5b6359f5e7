//! ============================================================================
//! Bootstrap Discovery - Predict where the next session's question ids start
//! ============================================================================
//! Plays one throwaway game, answering every question with its first
//! suggestion, and reports `last question id + 1`. The prediction is a hint:
//! the orchestrator re-validates it against each session's first question.
//! ============================================================================

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::GameApi;
use crate::retry::{with_retry, RetryConfig};
use crate::types::{FacesError, FacesResult, GameId, QuestionId};

/// Result of a discovery game
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub game_id: GameId,
    pub last_question_id: QuestionId,
    pub questions_seen: u32,
}

impl Discovery {
    /// Predicted first question id of the next game
    pub fn offset(&self) -> QuestionId {
        self.last_question_id + 1
    }
}

/// Play one disposable game of `questions` questions. Labels are never
/// learned here.
pub async fn discover_offset(
    api: &dyn GameApi,
    questions: u32,
    retry: &RetryConfig,
    cancel: &CancellationToken,
) -> FacesResult<Discovery> {
    let game_id = with_retry(retry, "create bootstrap game", cancel, || api.create_session()).await?;
    info!("Bootstrap game {} started", game_id);

    let mut last_question_id = None;
    let mut questions_seen = 0;

    for _ in 0..questions {
        let question =
            with_retry(retry, "bootstrap question", cancel, || api.next_question(&game_id)).await?;
        last_question_id = Some(question.id);
        questions_seen += 1;

        let Some(first) = question.suggestions.first() else {
            warn!("Bootstrap question {} has no suggestions", question.id);
            continue;
        };
        let suggestion_id = first.id;
        with_retry(retry, "bootstrap answer", cancel, || {
            api.submit_answer(&game_id, question.id, suggestion_id)
        })
        .await?;
    }

    let last_question_id = last_question_id
        .ok_or_else(|| FacesError::ProtocolMismatch("bootstrap game had no questions".into()))?;
    let discovery = Discovery {
        game_id,
        last_question_id,
        questions_seen,
    };
    info!(
        "Bootstrap saw {} questions, next game predicted to start at {}",
        discovery.questions_seen,
        discovery.offset()
    );
    Ok(discovery)
}
