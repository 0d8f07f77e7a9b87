//! In-memory cache mock.
//!
//! Implements [`QuizCache`] with the same observable behaviour as the Redis
//! cache: session snapshots by code, one ranking per code, and per-user
//! session data that can be removed.

use async_trait::async_trait;
use quiz_service::cache::{sort_ranking, QuizCache};
use quiz_service::errors::QuizError;
use quiz_service::models::{LeaderboardEntry, Quiz, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
pub struct InMemoryCache {
    inner: Arc<Mutex<CacheState>>,
}

#[derive(Default)]
struct CacheState {
    quizzes: HashMap<String, Quiz>,
    rankings: HashMap<String, (Vec<LeaderboardEntry>, Duration)>,
    user_data: HashMap<(String, UserId), String>,
    removed_user_data: Vec<(String, UserId)>,
    fail_reads: bool,
    fail_writes: bool,
}

fn cache_error(what: &str) -> QuizError {
    QuizError::Cache(format!("injected failure: {what}"))
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_quiz(&self, code: &str) -> Option<Quiz> {
        self.inner.lock().unwrap().quizzes.get(code).cloned()
    }

    /// Published ranking and the expiry it was written with.
    pub fn ranking(&self, code: &str) -> Option<(Vec<LeaderboardEntry>, Duration)> {
        self.inner.lock().unwrap().rankings.get(code).cloned()
    }

    pub fn put_user_data(&self, code: &str, user_id: UserId, value: &str) {
        self.inner
            .lock()
            .unwrap()
            .user_data
            .insert((code.to_string(), user_id), value.to_string());
    }

    pub fn has_user_data(&self, code: &str, user_id: UserId) -> bool {
        self.inner
            .lock()
            .unwrap()
            .user_data
            .contains_key(&(code.to_string(), user_id))
    }

    pub fn removed_user_data(&self) -> Vec<(String, UserId)> {
        self.inner.lock().unwrap().removed_user_data.clone()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.lock().unwrap().fail_reads = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_writes = fail;
    }
}

#[async_trait]
impl QuizCache for InMemoryCache {
    async fn get_quiz(&self, code: &str) -> Result<Option<Quiz>, QuizError> {
        let state = self.inner.lock().unwrap();
        if state.fail_reads {
            return Err(cache_error("get_quiz"));
        }
        Ok(state.quizzes.get(code).cloned())
    }

    async fn set_quiz(&self, quiz: &Quiz, _ttl: Duration) -> Result<(), QuizError> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_writes {
            return Err(cache_error("set_quiz"));
        }
        state.quizzes.insert(quiz.code.clone(), quiz.clone());
        Ok(())
    }

    async fn set_ranking(
        &self,
        code: &str,
        entries: &[LeaderboardEntry],
        ttl: Duration,
    ) -> Result<(), QuizError> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_writes {
            return Err(cache_error("set_ranking"));
        }
        let mut ranking = entries.to_vec();
        sort_ranking(&mut ranking);
        state.rankings.insert(code.to_string(), (ranking, ttl));
        Ok(())
    }

    async fn get_ranking(&self, code: &str) -> Result<Option<Vec<LeaderboardEntry>>, QuizError> {
        let state = self.inner.lock().unwrap();
        if state.fail_reads {
            return Err(cache_error("get_ranking"));
        }
        Ok(state.rankings.get(code).map(|(ranking, _)| ranking.clone()))
    }

    async fn remove_user_data(&self, code: &str, user_id: UserId) -> Result<(), QuizError> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_writes {
            return Err(cache_error("remove_user_data"));
        }
        state.user_data.remove(&(code.to_string(), user_id));
        state.removed_user_data.push((code.to_string(), user_id));
        Ok(())
    }
}
