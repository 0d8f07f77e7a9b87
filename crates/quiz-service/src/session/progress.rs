//! Progress tracking and participant departure.
//!
//! The persisted progress record is the single source of truth for a
//! user's position in a session. Nothing is kept in memory.

use crate::actors::DepartureHandler;
use crate::cache::QuizCache;
use crate::errors::QuizError;
use crate::models::{score_answer, NewResponse, QuestionId, Quiz, QuizId, UserId, UserProfile};
use crate::observability::metrics;
use crate::repositories::QuizRepository;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of recording one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub score: i64,
    /// The user's next question index after the answer, or `None` for a
    /// host answer, which never drives sequencing.
    pub next_index: Option<usize>,
}

#[derive(Clone)]
pub struct ProgressTracker {
    repo: Arc<dyn QuizRepository>,
    cache: Arc<dyn QuizCache>,
}

impl ProgressTracker {
    pub fn new(repo: Arc<dyn QuizRepository>, cache: Arc<dyn QuizCache>) -> Self {
        Self { repo, cache }
    }

    /// Score and persist an answer, then advance the user's progress.
    ///
    /// Answers from the host are accepted with score 0 and are neither
    /// stored nor sequenced.
    ///
    /// # Errors
    ///
    /// - `QuizError::BadRequest` - the question is not part of `quiz`
    /// - `QuizError::Database` - the response could not be stored
    #[instrument(
        skip_all,
        name = "quiz.session.progress",
        fields(quiz_id = quiz.id, user_id = user.user_id, question_id = question_id)
    )]
    pub async fn record_answer(
        &self,
        user: &UserProfile,
        quiz: &Quiz,
        question_id: QuestionId,
        answer: &str,
        elapsed_seconds: i64,
    ) -> Result<AnswerOutcome, QuizError> {
        if self.repo.is_host(quiz.id, user.user_id).await? {
            metrics::record_answer("host_ignored");
            debug!(target: "quiz.session.progress", "Ignoring answer from host");
            return Ok(AnswerOutcome {
                score: 0,
                next_index: None,
            });
        }

        let question = quiz.find_question(question_id).ok_or_else(|| {
            QuizError::BadRequest("Question does not belong to this quiz".to_string())
        })?;

        let score = score_answer(answer, &question.correct_answer, elapsed_seconds);
        metrics::record_answer(if answer == question.correct_answer {
            "correct"
        } else {
            "incorrect"
        });

        self.repo
            .save_response(&NewResponse {
                quiz_id: quiz.id,
                question_id,
                user_id: user.user_id,
                username: user.username.clone(),
                answer: answer.to_string(),
                score,
                time_spent: elapsed_seconds.max(0),
            })
            .await?;

        let next_index = match self.repo.advance_progress(quiz.id, user.user_id).await {
            Ok(next) => next,
            Err(e) => {
                metrics::record_best_effort_failure("advance_progress");
                warn!(
                    target: "quiz.session.progress",
                    error = %e,
                    "Failed to advance progress; sequencing from the stored index"
                );
                self.fallback_next_index(quiz.id, user.user_id).await
            }
        };

        debug!(
            target: "quiz.session.progress",
            score = score,
            next_index = ?next_index,
            "Answer recorded"
        );

        Ok(AnswerOutcome {
            score,
            next_index: Some(next_index),
        })
    }

    /// Index one past the stored progress, used when the increment itself
    /// failed. Falls back to 1 if the progress cannot be read either.
    async fn fallback_next_index(&self, quiz_id: QuizId, user_id: UserId) -> usize {
        match self.repo.progress(quiz_id, user_id).await {
            Ok(index) => index.saturating_add(1),
            Err(e) => {
                metrics::record_best_effort_failure("read_progress");
                warn!(target: "quiz.session.progress", error = %e, "Failed to read progress");
                1
            }
        }
    }

    /// Current next-question index of a user (0 if none recorded).
    pub async fn progress(&self, quiz_id: QuizId, user_id: UserId) -> Result<usize, QuizError> {
        self.repo.progress(quiz_id, user_id).await
    }

    /// Reset every user of a session to index 0.
    pub async fn reset(&self, quiz_id: QuizId) -> Result<(), QuizError> {
        self.repo.reset_progress(quiz_id).await
    }

    async fn remove_participant(
        &self,
        quiz_code: &str,
        quiz_id: QuizId,
        user_id: UserId,
    ) -> Result<(), QuizError> {
        if self.repo.is_host(quiz_id, user_id).await? {
            return Ok(());
        }

        self.repo.remove_participant(quiz_id, user_id).await?;

        if let Err(e) = self.repo.clear_user_progress(quiz_id, user_id).await {
            metrics::record_best_effort_failure("clear_user_progress");
            warn!(target: "quiz.session.progress", quiz_code = %quiz_code, user_id = user_id, error = %e, "Failed to clear responses and progress");
        }

        if let Err(e) = self.cache.remove_user_data(quiz_code, user_id).await {
            metrics::record_best_effort_failure("remove_user_data");
            warn!(target: "quiz.session.progress", quiz_code = %quiz_code, user_id = user_id, error = %e, "Failed to clear cached user data");
        }

        info!(target: "quiz.session.progress", quiz_code = %quiz_code, user_id = user_id, "Participant removed");
        Ok(())
    }
}

#[async_trait::async_trait]
impl DepartureHandler for ProgressTracker {
    async fn participant_left(&self, quiz_code: String, quiz_id: QuizId, user_id: UserId) {
        if let Err(e) = self.remove_participant(&quiz_code, quiz_id, user_id).await {
            metrics::record_best_effort_failure("remove_participant");
            warn!(
                target: "quiz.session.progress",
                quiz_code = %quiz_code,
                user_id = user_id,
                error = %e,
                "Failed to remove departed participant"
            );
        }
    }
}
