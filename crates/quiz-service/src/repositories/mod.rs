//! Persistent store for quizzes, responses, participants and progress.
//!
//! The coordination engine talks to the store only through
//! [`QuizRepository`], so tests can substitute an in-memory implementation.

pub mod postgres;

pub use postgres::PgQuizRepository;

use crate::errors::QuizError;
use crate::models::{
    CreateQuizRequest, LeaderboardEntry, NewResponse, Quiz, QuizId, SessionStatus, UserId,
    UserProfile,
};

/// Store operations used by the service.
#[async_trait::async_trait]
pub trait QuizRepository: Send + Sync {
    /// Insert a quiz with its questions and options.
    ///
    /// Returns `QuizError::Conflict` if `code` is already taken.
    async fn create_quiz(
        &self,
        code: &str,
        creator_id: UserId,
        request: &CreateQuizRequest,
    ) -> Result<Quiz, QuizError>;

    async fn find_quiz_by_code(&self, code: &str) -> Result<Option<Quiz>, QuizError>;

    async fn find_quiz_by_id(&self, quiz_id: QuizId) -> Result<Option<Quiz>, QuizError>;

    /// Quizzes created by `creator_id`, newest first.
    async fn quizzes_by_creator(&self, creator_id: UserId) -> Result<Vec<Quiz>, QuizError>;

    async fn set_status(&self, quiz_id: QuizId, status: SessionStatus) -> Result<(), QuizError>;

    async fn is_host(&self, quiz_id: QuizId, user_id: UserId) -> Result<bool, QuizError>;

    /// Add a participant row. Joining twice is not an error.
    async fn add_participant(&self, quiz_id: QuizId, profile: &UserProfile)
        -> Result<(), QuizError>;

    async fn remove_participant(&self, quiz_id: QuizId, user_id: UserId) -> Result<(), QuizError>;

    async fn save_response(&self, response: &NewResponse) -> Result<(), QuizError>;

    /// Delete a user's responses and progress for one quiz.
    async fn clear_user_progress(&self, quiz_id: QuizId, user_id: UserId)
        -> Result<(), QuizError>;

    /// Next question index for a user; 0 if no record exists.
    async fn progress(&self, quiz_id: QuizId, user_id: UserId) -> Result<usize, QuizError>;

    /// Atomically advance a user's next index by one and return the new value.
    async fn advance_progress(&self, quiz_id: QuizId, user_id: UserId)
        -> Result<usize, QuizError>;

    /// Reset every progress record of a quiz to index 0.
    async fn reset_progress(&self, quiz_id: QuizId) -> Result<(), QuizError>;

    /// Distinct users with at least one stored response.
    async fn unique_participant_count(&self, quiz_id: QuizId) -> Result<usize, QuizError>;

    /// Users whose next index has reached `total_questions`.
    async fn finished_count(
        &self,
        quiz_id: QuizId,
        total_questions: usize,
    ) -> Result<usize, QuizError>;

    /// Total score per username, highest first.
    async fn leaderboard(&self, quiz_id: QuizId) -> Result<Vec<LeaderboardEntry>, QuizError>;
}
