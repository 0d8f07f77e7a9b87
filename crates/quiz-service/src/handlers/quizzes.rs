//! Quiz session handlers.
//!
//! - `POST /api/quiz` - Create a session
//! - `GET /api/quiz/my-quizzes` - Sessions created by the caller
//! - `GET /api/quiz/{code}` - Session lookup (answers only for the host)
//! - `POST /api/quiz/{code}/join` - Join as a participant
//! - `POST /api/quiz/{code}/start` - Start or restart (host only)
//! - `POST /api/quiz/answer` - Submit an answer
//! - `GET /api/quiz/{code}/leaderboard` - Current ranking
//!
//! Every route sits behind `require_user_auth`, so [`Claims`] is always
//! present in request extensions.

use crate::auth::Claims;
use crate::errors::QuizError;
use crate::models::{
    AnswerResponse, CreateQuizRequest, LeaderboardEntry, QuizView, SubmitAnswerRequest,
};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use ring::rand::{SecureRandom, SystemRandom};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Session code alphabet.
const QUIZ_CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Session code length.
pub const QUIZ_CODE_LENGTH: usize = 6;

/// Attempts at finding an unused session code before giving up.
const MAX_CODE_COLLISION_RETRIES: usize = 3;

// ============================================================================
// Handler: POST /api/quiz
// ============================================================================

/// Handler for POST /api/quiz
///
/// # Response
///
/// - 201 Created: session created with status `pending`
/// - 400 Bad Request: malformed or invalid body
/// - 500 Internal Server Error: code collision retries exhausted or store failure
#[instrument(skip_all, name = "quiz.handlers.create", fields(user_id = claims.user_id))]
pub async fn create_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    body: Bytes,
) -> Result<(StatusCode, Json<QuizView>), QuizError> {
    let request: CreateQuizRequest = parse_body(&body)?;
    request.validate().map_err(QuizError::BadRequest)?;

    for attempt in 0..MAX_CODE_COLLISION_RETRIES {
        let code = generate_quiz_code()?;

        match state
            .repo
            .create_quiz(&code, claims.user_id, &request)
            .await
        {
            Ok(quiz) => {
                state.catalog.refresh(&quiz).await;
                info!(
                    target: "quiz.handlers",
                    quiz_code = %quiz.code,
                    questions = quiz.total_questions(),
                    "Quiz created"
                );
                return Ok((StatusCode::CREATED, Json(quiz.view(true))));
            }
            Err(QuizError::Conflict(_)) => {
                warn!(
                    target: "quiz.handlers",
                    attempt = attempt + 1,
                    "Quiz code collision, retrying"
                );
            }
            Err(e) => return Err(e),
        }
    }

    Err(QuizError::Internal(
        "Failed to generate unique quiz code".to_string(),
    ))
}

// ============================================================================
// Handler: GET /api/quiz/my-quizzes
// ============================================================================

#[instrument(skip_all, name = "quiz.handlers.my_quizzes", fields(user_id = claims.user_id))]
pub async fn my_quizzes(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<QuizView>>, QuizError> {
    let quizzes = state.repo.quizzes_by_creator(claims.user_id).await?;
    Ok(Json(quizzes.iter().map(|q| q.view(true)).collect()))
}

// ============================================================================
// Handler: GET /api/quiz/{code}
// ============================================================================

/// Handler for GET /api/quiz/{code}
///
/// Correct answers are included only when the caller hosts the session.
#[instrument(skip_all, name = "quiz.handlers.get", fields(quiz_code = %code))]
pub async fn get_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(code): Path<String>,
) -> Result<Json<QuizView>, QuizError> {
    let quiz = state.catalog.lookup(&code).await?;
    Ok(Json(quiz.view(quiz.is_host(claims.user_id))))
}

// ============================================================================
// Handler: POST /api/quiz/{code}/join
// ============================================================================

#[instrument(skip_all, name = "quiz.handlers.join", fields(quiz_code = %code))]
pub async fn join_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(code): Path<String>,
) -> Result<Json<QuizView>, QuizError> {
    let quiz = state.sequencer.join(&code, &claims.profile()).await?;
    Ok(Json(quiz.view(quiz.is_host(claims.user_id))))
}

// ============================================================================
// Handler: POST /api/quiz/{code}/start
// ============================================================================

/// Handler for POST /api/quiz/{code}/start
///
/// # Response
///
/// - 200 OK: session is active and question 0 was broadcast
/// - 400 Bad Request: session has no questions
/// - 403 Forbidden: caller is not the host
/// - 404 Not Found: unknown code
#[instrument(skip_all, name = "quiz.handlers.start", fields(quiz_code = %code))]
pub async fn start_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(code): Path<String>,
) -> Result<Json<QuizView>, QuizError> {
    let quiz = state.sequencer.start(&code, claims.user_id).await?;
    Ok(Json(quiz.view(true)))
}

// ============================================================================
// Handler: POST /api/quiz/answer
// ============================================================================

/// Handler for POST /api/quiz/answer
///
/// Returns the score as soon as the answer is stored. The next question (or
/// the completion check) is delivered over the WebSocket afterwards.
#[instrument(skip_all, name = "quiz.handlers.answer", fields(user_id = claims.user_id))]
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    body: Bytes,
) -> Result<Json<AnswerResponse>, QuizError> {
    let request: SubmitAnswerRequest = parse_body(&body)?;
    let response = state
        .sequencer
        .submit_answer(&claims.profile(), &request)
        .await?;
    Ok(Json(response))
}

// ============================================================================
// Handler: GET /api/quiz/{code}/leaderboard
// ============================================================================

#[instrument(skip_all, name = "quiz.handlers.leaderboard", fields(quiz_code = %code))]
pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<Vec<LeaderboardEntry>>, QuizError> {
    let quiz = state.catalog.lookup(&code).await?;
    let ranking = state.publisher.current(&quiz).await?;
    Ok(Json(ranking))
}

// ============================================================================
// Helpers
// ============================================================================

/// Deserialize a JSON body manually to return 400 rather than axum's 422.
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, QuizError> {
    serde_json::from_slice(body).map_err(|e| {
        debug!(target: "quiz.handlers", error = %e, "Invalid request body");
        QuizError::BadRequest("Invalid request body".to_string())
    })
}

/// Generate a random session code from `[A-Z0-9]` using a CSPRNG.
pub(crate) fn generate_quiz_code() -> Result<String, QuizError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 8];

    rng.fill(&mut bytes).map_err(|e| {
        tracing::error!(target: "quiz.handlers", error = %e, "Failed to generate random bytes for quiz code");
        QuizError::Internal("RNG failure".to_string())
    })?;

    let mut value = u64::from_be_bytes(bytes);
    let radix = QUIZ_CODE_CHARS.len() as u64;

    let mut code = String::with_capacity(QUIZ_CODE_LENGTH);
    for _ in 0..QUIZ_CODE_LENGTH {
        let idx = usize::try_from(value % radix)
            .map_err(|_| QuizError::Internal("Code index out of range".to_string()))?;
        let ch = QUIZ_CODE_CHARS
            .get(idx)
            .ok_or_else(|| QuizError::Internal("Code index out of range".to_string()))?;
        code.push(char::from(*ch));
        value /= radix;
    }

    Ok(code)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_use_alphabet() {
        for _ in 0..200 {
            let code = generate_quiz_code().unwrap();
            assert_eq!(code.len(), QUIZ_CODE_LENGTH);
            assert!(code
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_generated_codes_vary() {
        let a = generate_quiz_code().unwrap();
        let b = generate_quiz_code().unwrap();
        let c = generate_quiz_code().unwrap();
        assert!(a != b || b != c);
    }

    #[test]
    fn test_parse_body_rejects_malformed_json() {
        let result: Result<SubmitAnswerRequest, _> = parse_body(b"{not json");
        assert!(matches!(result, Err(QuizError::BadRequest(_))));

        let ok: SubmitAnswerRequest =
            parse_body(br#"{"quiz_id":1,"question_id":2,"answer":"4"}"#).unwrap();
        assert_eq!(ok.time_spent, 0);
    }
}
