//! Session coordination: lookup, progress, sequencing and ranking.
//!
//! # Components
//!
//! - [`QuizCatalog`] - cache-aside session lookup
//! - `progress` - answer scoring, per-user progress and participant departure
//! - `leaderboard` - ranking aggregation and publication
//! - `sequencer` - `pending → active → finished` state machine

pub mod leaderboard;
pub mod progress;
pub mod sequencer;

pub use leaderboard::LeaderboardPublisher;
pub use progress::{AnswerOutcome, ProgressTracker};
pub use sequencer::SessionSequencer;

use crate::cache::QuizCache;
use crate::errors::QuizError;
use crate::models::{Quiz, QuizId};
use crate::repositories::QuizRepository;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Session lookup through the cache, falling back to the store.
#[derive(Clone)]
pub struct QuizCatalog {
    repo: Arc<dyn QuizRepository>,
    cache: Arc<dyn QuizCache>,
    ttl: Duration,
}

impl QuizCatalog {
    pub fn new(repo: Arc<dyn QuizRepository>, cache: Arc<dyn QuizCache>, ttl: Duration) -> Self {
        Self { repo, cache, ttl }
    }

    /// Find a session by code.
    ///
    /// A cache error is treated as a miss. Writing the loaded session back
    /// to the cache is best-effort.
    ///
    /// # Errors
    ///
    /// - `QuizError::NotFound` - no session has this code
    /// - `QuizError::Database` - store lookup failed
    #[instrument(skip_all, fields(quiz_code = %code))]
    pub async fn lookup(&self, code: &str) -> Result<Quiz, QuizError> {
        match self.cache.get_quiz(code).await {
            Ok(Some(quiz)) => return Ok(quiz),
            Ok(None) => {
                debug!(target: "quiz.cache", quiz_code = %code, "Session cache miss");
            }
            Err(e) => {
                warn!(target: "quiz.cache", quiz_code = %code, error = %e, "Session cache read failed, using store");
            }
        }

        let quiz = self
            .repo
            .find_quiz_by_code(code)
            .await?
            .ok_or_else(|| QuizError::NotFound("Quiz not found".to_string()))?;

        self.refresh(&quiz).await;
        Ok(quiz)
    }

    /// Find a session by id. Always reads the store.
    ///
    /// # Errors
    ///
    /// - `QuizError::NotFound` - no session has this id
    /// - `QuizError::Database` - store lookup failed
    pub async fn by_id(&self, quiz_id: QuizId) -> Result<Quiz, QuizError> {
        self.repo
            .find_quiz_by_id(quiz_id)
            .await?
            .ok_or_else(|| QuizError::NotFound("Quiz not found".to_string()))
    }

    /// Rewrite the cached copy of a session. Failures are logged only.
    pub async fn refresh(&self, quiz: &Quiz) {
        if let Err(e) = self.cache.set_quiz(quiz, self.ttl).await {
            warn!(target: "quiz.cache", quiz_code = %quiz.code, error = %e, "Failed to cache session");
        }
    }
}
