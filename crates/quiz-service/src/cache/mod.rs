//! Cache for quiz sessions and published rankings.
//!
//! # Key Patterns
//!
//! - `quiz:{code}` - serialized quiz (JSON)
//! - `leaderboard:{code}` - published ranking (sorted set, member = username)
//! - `quiz:{code}:user:{user_id}` - per-user session data

pub mod redis;

pub use self::redis::RedisQuizCache;

use crate::errors::QuizError;
use crate::models::{LeaderboardEntry, Quiz, UserId};
use std::time::Duration;

pub fn quiz_key(code: &str) -> String {
    format!("quiz:{code}")
}

pub fn leaderboard_key(code: &str) -> String {
    format!("leaderboard:{code}")
}

pub fn user_data_key(code: &str, user_id: UserId) -> String {
    format!("quiz:{code}:user:{user_id}")
}

/// Cache operations used by the service.
#[async_trait::async_trait]
pub trait QuizCache: Send + Sync {
    async fn get_quiz(&self, code: &str) -> Result<Option<Quiz>, QuizError>;

    async fn set_quiz(&self, quiz: &Quiz, ttl: Duration) -> Result<(), QuizError>;

    /// Replace the stored ranking for `code`.
    async fn set_ranking(
        &self,
        code: &str,
        entries: &[LeaderboardEntry],
        ttl: Duration,
    ) -> Result<(), QuizError>;

    /// Stored ranking, highest score first. `None` if nothing was published.
    async fn get_ranking(&self, code: &str) -> Result<Option<Vec<LeaderboardEntry>>, QuizError>;

    async fn remove_user_data(&self, code: &str, user_id: UserId) -> Result<(), QuizError>;
}

/// Order a ranking by score descending, then username ascending.
pub fn sort_ranking(entries: &mut [LeaderboardEntry]) {
    entries.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.username.cmp(&b.username)));
}
