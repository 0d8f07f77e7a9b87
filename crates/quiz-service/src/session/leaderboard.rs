//! Ranking aggregation and publication.

use crate::cache::{sort_ranking, QuizCache};
use crate::errors::QuizError;
use crate::models::{LeaderboardEntry, Quiz};
use crate::observability::metrics;
use crate::repositories::QuizRepository;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
pub struct LeaderboardPublisher {
    repo: Arc<dyn QuizRepository>,
    cache: Arc<dyn QuizCache>,
    ttl: Duration,
}

impl LeaderboardPublisher {
    pub fn new(repo: Arc<dyn QuizRepository>, cache: Arc<dyn QuizCache>, ttl: Duration) -> Self {
        Self { repo, cache, ttl }
    }

    /// Aggregate total score per username and publish it to the ranking cache.
    ///
    /// Calling this again for the same responses yields the same ranking.
    /// A cache write failure is logged and the ranking is still returned.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Database` if responses cannot be aggregated.
    #[instrument(skip_all, name = "quiz.session.leaderboard", fields(quiz_code = %quiz.code))]
    pub async fn publish(&self, quiz: &Quiz) -> Result<Vec<LeaderboardEntry>, QuizError> {
        let started = Instant::now();

        let mut ranking = self.repo.leaderboard(quiz.id).await?;
        sort_ranking(&mut ranking);

        if let Err(e) = self.cache.set_ranking(&quiz.code, &ranking, self.ttl).await {
            metrics::record_best_effort_failure("set_ranking");
            warn!(
                target: "quiz.session.leaderboard",
                quiz_code = %quiz.code,
                error = %e,
                "Failed to cache ranking"
            );
        }

        metrics::record_leaderboard_published(started.elapsed());
        info!(
            target: "quiz.session.leaderboard",
            quiz_code = %quiz.code,
            entries = ranking.len(),
            "Leaderboard published"
        );

        Ok(ranking)
    }

    /// Published ranking if cached, otherwise computed from stored responses.
    pub async fn current(&self, quiz: &Quiz) -> Result<Vec<LeaderboardEntry>, QuizError> {
        match self.cache.get_ranking(&quiz.code).await {
            Ok(Some(ranking)) => return Ok(ranking),
            Ok(None) => {}
            Err(e) => {
                debug!(target: "quiz.session.leaderboard", quiz_code = %quiz.code, error = %e, "Ranking cache read failed");
            }
        }

        let mut ranking = self.repo.leaderboard(quiz.id).await?;
        sort_ranking(&mut ranking);
        Ok(ranking)
    }
}
