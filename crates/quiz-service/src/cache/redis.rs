//! Redis implementation of [`QuizCache`].
//!
//! The multiplexed connection is cheap to clone and safe to use
//! concurrently; each operation clones it instead of locking.

use super::{leaderboard_key, quiz_key, sort_ranking, user_data_key, QuizCache};
use crate::errors::QuizError;
use crate::models::{LeaderboardEntry, Quiz, UserId};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

#[derive(Clone)]
pub struct RedisQuizCache {
    connection: MultiplexedConnection,
}

impl RedisQuizCache {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Cache` if the client cannot be opened or connected.
    pub async fn connect(redis_url: &str) -> Result<Self, QuizError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Do NOT log redis_url: it may contain credentials.
            error!(target: "quiz.cache", error = %e, "Failed to open Redis client");
            QuizError::Cache(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "quiz.cache", error = %e, "Failed to connect to Redis");
                QuizError::Cache(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self { connection })
    }
}

fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait::async_trait]
impl QuizCache for RedisQuizCache {
    #[instrument(skip_all, fields(quiz_code = %code))]
    async fn get_quiz(&self, code: &str) -> Result<Option<Quiz>, QuizError> {
        let mut conn = self.connection.clone();

        let raw: Option<String> = conn.get(quiz_key(code)).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<Quiz>(&raw) {
            Ok(quiz) => Ok(Some(quiz)),
            Err(e) => {
                // A stale schema is a miss, not a failure.
                warn!(target: "quiz.cache", quiz_code = %code, error = %e, "Discarding undecodable cached quiz");
                Ok(None)
            }
        }
    }

    #[instrument(skip_all, fields(quiz_code = %quiz.code))]
    async fn set_quiz(&self, quiz: &Quiz, ttl: Duration) -> Result<(), QuizError> {
        let mut conn = self.connection.clone();
        let payload = serde_json::to_string(quiz)
            .map_err(|e| QuizError::Internal(format!("quiz serialization failed: {e}")))?;

        let _: () = conn
            .set_ex(quiz_key(&quiz.code), payload, ttl_seconds(ttl))
            .await?;

        debug!(target: "quiz.cache", quiz_code = %quiz.code, "Cached quiz");
        Ok(())
    }

    #[instrument(skip_all, fields(quiz_code = %code, entries = entries.len()))]
    async fn set_ranking(
        &self,
        code: &str,
        entries: &[LeaderboardEntry],
        ttl: Duration,
    ) -> Result<(), QuizError> {
        let mut conn = self.connection.clone();
        let key = leaderboard_key(code);

        let mut pipe = redis::pipe();
        pipe.atomic().del(&key).ignore();
        if !entries.is_empty() {
            let members: Vec<(i64, &str)> = entries
                .iter()
                .map(|e| (e.score, e.username.as_str()))
                .collect();
            pipe.zadd_multiple(&key, &members)
                .ignore()
                .expire(&key, i64::try_from(ttl_seconds(ttl)).unwrap_or(i64::MAX))
                .ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(quiz_code = %code))]
    async fn get_ranking(&self, code: &str) -> Result<Option<Vec<LeaderboardEntry>>, QuizError> {
        let mut conn = self.connection.clone();

        let raw: Vec<(String, f64)> = conn
            .zrevrange_withscores(leaderboard_key(code), 0, -1)
            .await?;
        if raw.is_empty() {
            return Ok(None);
        }

        let mut entries: Vec<LeaderboardEntry> = raw
            .into_iter()
            .map(|(username, score)| LeaderboardEntry {
                username,
                score: score.round() as i64,
            })
            .collect();
        sort_ranking(&mut entries);

        Ok(Some(entries))
    }

    #[instrument(skip_all, fields(quiz_code = %code, user_id = user_id))]
    async fn remove_user_data(&self, code: &str, user_id: UserId) -> Result<(), QuizError> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(user_data_key(code, user_id)).await?;
        Ok(())
    }
}
