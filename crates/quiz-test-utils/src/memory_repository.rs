//! In-memory persistent store.
//!
//! Implements [`QuizRepository`] over plain maps so the coordination engine
//! can be exercised without Postgres. Failure switches let tests drive the
//! best-effort paths.
//!
//! # Example
//!
//! ```rust,ignore
//! let repo = InMemoryRepository::new();
//! let quiz = repo.insert_quiz(QuizFixture::new("ABC123", 1).question("2+2?", &["3", "4"], "4"));
//! repo.set_fail_advance(true);
//! ```

use crate::fixtures::QuizFixture;
use async_trait::async_trait;
use quiz_service::errors::QuizError;
use quiz_service::models::{
    CreateQuizRequest, LeaderboardEntry, NewResponse, Question, Quiz, QuizId, SessionStatus,
    UserId, UserProfile, DEFAULT_TIME_LIMIT_SECONDS,
};
use quiz_service::repositories::QuizRepository;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
pub struct InMemoryRepository {
    inner: Arc<Mutex<RepoState>>,
}

#[derive(Default)]
struct RepoState {
    next_quiz_id: QuizId,
    next_question_id: i64,
    quizzes: BTreeMap<QuizId, Quiz>,
    participants: HashMap<QuizId, BTreeMap<UserId, UserProfile>>,
    responses: Vec<NewResponse>,
    progress: HashMap<(QuizId, UserId), usize>,
    leaderboard_calls: usize,
    removed_participants: Vec<(QuizId, UserId)>,
    fail_advance: bool,
    fail_clear: bool,
    fail_save: bool,
    fail_leaderboard: usize,
    leaderboard_delay: Option<Duration>,
}

impl RepoState {
    fn allocate(&mut self, mut quiz: Quiz) -> Quiz {
        self.next_quiz_id += 1;
        quiz.id = self.next_quiz_id;
        for question in &mut quiz.questions {
            self.next_question_id += 1;
            question.id = self.next_question_id;
            question.quiz_id = quiz.id;
        }
        self.quizzes.insert(quiz.id, quiz.clone());
        quiz
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a quiz built from a fixture, assigning quiz and question ids.
    pub fn insert_quiz(&self, fixture: QuizFixture) -> Quiz {
        self.inner.lock().unwrap().allocate(fixture.build())
    }

    pub fn quiz(&self, quiz_id: QuizId) -> Option<Quiz> {
        self.inner.lock().unwrap().quizzes.get(&quiz_id).cloned()
    }

    pub fn status(&self, quiz_id: QuizId) -> Option<SessionStatus> {
        self.quiz(quiz_id).map(|q| q.status)
    }

    pub fn responses(&self, quiz_id: QuizId) -> Vec<NewResponse> {
        self.inner
            .lock()
            .unwrap()
            .responses
            .iter()
            .filter(|r| r.quiz_id == quiz_id)
            .cloned()
            .collect()
    }

    /// Stored next index, `None` if the user has no record.
    pub fn progress_of(&self, quiz_id: QuizId, user_id: UserId) -> Option<usize> {
        self.inner
            .lock()
            .unwrap()
            .progress
            .get(&(quiz_id, user_id))
            .copied()
    }

    pub fn set_progress(&self, quiz_id: QuizId, user_id: UserId, next_index: usize) {
        self.inner
            .lock()
            .unwrap()
            .progress
            .insert((quiz_id, user_id), next_index);
    }

    pub fn participants(&self, quiz_id: QuizId) -> Vec<UserProfile> {
        self.inner
            .lock()
            .unwrap()
            .participants
            .get(&quiz_id)
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn removed_participants(&self) -> Vec<(QuizId, UserId)> {
        self.inner.lock().unwrap().removed_participants.clone()
    }

    /// Number of successful `leaderboard` aggregations.
    pub fn leaderboard_calls(&self) -> usize {
        self.inner.lock().unwrap().leaderboard_calls
    }

    pub fn set_fail_advance(&self, fail: bool) {
        self.inner.lock().unwrap().fail_advance = fail;
    }

    pub fn set_fail_clear(&self, fail: bool) {
        self.inner.lock().unwrap().fail_clear = fail;
    }

    pub fn set_fail_save(&self, fail: bool) {
        self.inner.lock().unwrap().fail_save = fail;
    }

    /// Fail the next `count` leaderboard aggregations.
    pub fn fail_next_leaderboards(&self, count: usize) {
        self.inner.lock().unwrap().fail_leaderboard = count;
    }

    /// Delay every leaderboard aggregation, widening race windows.
    pub fn set_leaderboard_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().leaderboard_delay = Some(delay);
    }

    fn with<T>(&self, f: impl FnOnce(&mut RepoState) -> T) -> T {
        f(&mut self.inner.lock().unwrap())
    }
}

fn db_error(what: &str) -> QuizError {
    QuizError::Database(format!("injected failure: {what}"))
}

#[async_trait]
impl QuizRepository for InMemoryRepository {
    async fn create_quiz(
        &self,
        code: &str,
        creator_id: UserId,
        request: &CreateQuizRequest,
    ) -> Result<Quiz, QuizError> {
        self.with(|state| {
            if state.quizzes.values().any(|q| q.code == code) {
                return Err(QuizError::Conflict("quiz code already exists".to_string()));
            }

            let questions = request
                .questions
                .iter()
                .enumerate()
                .map(|(position, q)| Question {
                    id: 0,
                    quiz_id: 0,
                    position: position as i32,
                    prompt: q.prompt.clone(),
                    options: q.options.clone(),
                    correct_answer: q.correct_answer.clone(),
                    time_limit: q.time_limit.unwrap_or(DEFAULT_TIME_LIMIT_SECONDS),
                })
                .collect();

            let quiz = Quiz {
                id: 0,
                code: code.to_string(),
                title: request.title.trim().to_string(),
                description: request.description.clone(),
                creator_id,
                status: SessionStatus::Pending,
                questions,
                created_at: chrono::Utc::now(),
            };
            Ok(state.allocate(quiz))
        })
    }

    async fn find_quiz_by_code(&self, code: &str) -> Result<Option<Quiz>, QuizError> {
        Ok(self.with(|state| state.quizzes.values().find(|q| q.code == code).cloned()))
    }

    async fn find_quiz_by_id(&self, quiz_id: QuizId) -> Result<Option<Quiz>, QuizError> {
        Ok(self.quiz(quiz_id))
    }

    async fn quizzes_by_creator(&self, creator_id: UserId) -> Result<Vec<Quiz>, QuizError> {
        Ok(self.with(|state| {
            state
                .quizzes
                .values()
                .rev()
                .filter(|q| q.creator_id == creator_id)
                .cloned()
                .collect()
        }))
    }

    async fn set_status(&self, quiz_id: QuizId, status: SessionStatus) -> Result<(), QuizError> {
        self.with(|state| match state.quizzes.get_mut(&quiz_id) {
            Some(quiz) => {
                quiz.status = status;
                Ok(())
            }
            None => Err(QuizError::NotFound("Quiz not found".to_string())),
        })
    }

    async fn is_host(&self, quiz_id: QuizId, user_id: UserId) -> Result<bool, QuizError> {
        Ok(self
            .quiz(quiz_id)
            .is_some_and(|quiz| quiz.creator_id == user_id))
    }

    async fn add_participant(
        &self,
        quiz_id: QuizId,
        profile: &UserProfile,
    ) -> Result<(), QuizError> {
        self.with(|state| {
            state
                .participants
                .entry(quiz_id)
                .or_default()
                .entry(profile.user_id)
                .or_insert_with(|| profile.clone());
        });
        Ok(())
    }

    async fn remove_participant(&self, quiz_id: QuizId, user_id: UserId) -> Result<(), QuizError> {
        self.with(|state| {
            if let Some(participants) = state.participants.get_mut(&quiz_id) {
                participants.remove(&user_id);
            }
            state.removed_participants.push((quiz_id, user_id));
        });
        Ok(())
    }

    async fn save_response(&self, response: &NewResponse) -> Result<(), QuizError> {
        self.with(|state| {
            if state.fail_save {
                return Err(db_error("save_response"));
            }
            state.responses.push(response.clone());
            Ok(())
        })
    }

    async fn clear_user_progress(
        &self,
        quiz_id: QuizId,
        user_id: UserId,
    ) -> Result<(), QuizError> {
        self.with(|state| {
            if state.fail_clear {
                return Err(db_error("clear_user_progress"));
            }
            state
                .responses
                .retain(|r| !(r.quiz_id == quiz_id && r.user_id == user_id));
            state.progress.remove(&(quiz_id, user_id));
            Ok(())
        })
    }

    async fn progress(&self, quiz_id: QuizId, user_id: UserId) -> Result<usize, QuizError> {
        Ok(self.progress_of(quiz_id, user_id).unwrap_or(0))
    }

    async fn advance_progress(
        &self,
        quiz_id: QuizId,
        user_id: UserId,
    ) -> Result<usize, QuizError> {
        self.with(|state| {
            if state.fail_advance {
                return Err(db_error("advance_progress"));
            }
            let next = state.progress.entry((quiz_id, user_id)).or_insert(0);
            *next += 1;
            Ok(*next)
        })
    }

    async fn reset_progress(&self, quiz_id: QuizId) -> Result<(), QuizError> {
        self.with(|state| {
            for (key, next) in state.progress.iter_mut() {
                if key.0 == quiz_id {
                    *next = 0;
                }
            }
        });
        Ok(())
    }

    async fn unique_participant_count(&self, quiz_id: QuizId) -> Result<usize, QuizError> {
        Ok(self.with(|state| {
            state
                .responses
                .iter()
                .filter(|r| r.quiz_id == quiz_id)
                .map(|r| r.user_id)
                .collect::<HashSet<_>>()
                .len()
        }))
    }

    async fn finished_count(
        &self,
        quiz_id: QuizId,
        total_questions: usize,
    ) -> Result<usize, QuizError> {
        Ok(self.with(|state| {
            state
                .progress
                .iter()
                .filter(|((id, _), next)| *id == quiz_id && **next >= total_questions)
                .count()
        }))
    }

    async fn leaderboard(&self, quiz_id: QuizId) -> Result<Vec<LeaderboardEntry>, QuizError> {
        let delay = self.with(|state| state.leaderboard_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.with(|state| {
            if state.fail_leaderboard > 0 {
                state.fail_leaderboard -= 1;
                return Err(db_error("leaderboard"));
            }
            state.leaderboard_calls += 1;

            let mut totals: BTreeMap<String, i64> = BTreeMap::new();
            for response in state.responses.iter().filter(|r| r.quiz_id == quiz_id) {
                *totals.entry(response.username.clone()).or_insert(0) += response.score;
            }

            let mut entries: Vec<LeaderboardEntry> = totals
                .into_iter()
                .map(|(username, score)| LeaderboardEntry { username, score })
                .collect();
            entries.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.username.cmp(&b.username)));
            Ok(entries)
        })
    }
}
