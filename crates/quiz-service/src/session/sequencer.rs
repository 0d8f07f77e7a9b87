//! Session sequencer: the `pending → active → finished` state machine.
//!
//! # Transitions
//!
//! - **start** (host): reset every progress record to 0, mark the session
//!   active, broadcast question 0 to the room.
//! - **advance** (host): broadcast the next question, or `quiz_end` past the
//!   last one.
//! - **participant advance**: after an answer is stored, send that user their
//!   next question, or evaluate completion once they have run out.
//! - **finish**: the first time every distinct responder has finished, publish
//!   the leaderboard to the room and mark the session finished.
//!
//! The host copy of a question carries `correct_answer`; participants never
//! see it.
//!
//! # At-most-once completion
//!
//! Each start gives the session a fresh activation number. Completion is
//! claimed under a lock per activation, so concurrent finishers publish the
//! final leaderboard once. A failed publication releases the claim. A run
//! whose activation was superseded by a restart while it was publishing
//! neither broadcasts nor finishes the session.
//!
//! Bookkeeping for a session is dropped once it is marked finished. The
//! stored status is re-read after a claim, so a late finisher cannot
//! publish a second time.

use super::leaderboard::LeaderboardPublisher;
use super::progress::ProgressTracker;
use super::QuizCatalog;
use crate::actors::{HubHandle, QuestionPayload, ServerEvent};
use crate::errors::QuizError;
use crate::models::{
    AnswerResponse, Quiz, QuizId, SessionStatus, SubmitAnswerRequest, UserId, UserProfile,
};
use crate::observability::metrics;
use crate::repositories::QuizRepository;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Completion bookkeeping for one session.
#[derive(Debug, Default)]
struct SessionRun {
    activation: u64,
    completion_claimed: bool,
}

pub struct SessionSequencer {
    catalog: QuizCatalog,
    repo: Arc<dyn QuizRepository>,
    tracker: ProgressTracker,
    publisher: LeaderboardPublisher,
    hub: HubHandle,
    runs: Mutex<HashMap<QuizId, SessionRun>>,
    /// Activations are unique across sessions so a dropped run can never be
    /// confused with a later one.
    activations: AtomicU64,
}

impl SessionSequencer {
    pub fn new(
        catalog: QuizCatalog,
        repo: Arc<dyn QuizRepository>,
        tracker: ProgressTracker,
        publisher: LeaderboardPublisher,
        hub: HubHandle,
    ) -> Self {
        Self {
            catalog,
            repo,
            tracker,
            publisher,
            hub,
            runs: Mutex::new(HashMap::new()),
            activations: AtomicU64::new(0),
        }
    }

    /// Start (or restart) a session.
    ///
    /// # Errors
    ///
    /// - `QuizError::NotFound` - unknown code
    /// - `QuizError::Forbidden` - caller is not the host
    /// - `QuizError::BadRequest` - the session has no questions
    #[instrument(skip_all, name = "quiz.session.sequencer", fields(quiz_code = %code, user_id = user_id))]
    pub async fn start(&self, code: &str, user_id: UserId) -> Result<Quiz, QuizError> {
        let mut quiz = self.catalog.lookup(code).await?;
        require_host(&quiz, user_id)?;
        if quiz.total_questions() == 0 {
            return Err(QuizError::BadRequest("Quiz has no questions".to_string()));
        }

        self.tracker.reset(quiz.id).await?;
        self.repo.set_status(quiz.id, SessionStatus::Active).await?;
        quiz.status = SessionStatus::Active;
        self.catalog.refresh(&quiz).await;

        let activation = {
            let mut runs = self.runs.lock().await;
            let run = runs.entry(quiz.id).or_default();
            run.activation = self.activations.fetch_add(1, Ordering::Relaxed) + 1;
            run.completion_claimed = false;
            run.activation
        };

        self.broadcast_question(&quiz, 0).await?;
        metrics::record_session_started();

        info!(
            target: "quiz.session.sequencer",
            quiz_code = %quiz.code,
            activation = activation,
            total = quiz.total_questions(),
            "Session started"
        );

        Ok(quiz)
    }

    /// Host-driven advance from `current_index`.
    ///
    /// # Errors
    ///
    /// - `QuizError::NotFound` - unknown code
    /// - `QuizError::Forbidden` - caller is not the host
    #[instrument(skip_all, name = "quiz.session.sequencer", fields(quiz_code = %code, current_index = current_index))]
    pub async fn advance(
        &self,
        code: &str,
        user_id: UserId,
        current_index: usize,
    ) -> Result<(), QuizError> {
        let quiz = self.catalog.lookup(code).await?;
        require_host(&quiz, user_id)?;

        let next = current_index.saturating_add(1);
        if next >= quiz.total_questions() {
            info!(target: "quiz.session.sequencer", quiz_code = %quiz.code, "Host reached the end of the quiz");
            return self.hub.broadcast(&quiz.code, &ServerEvent::QuizEnd {}).await;
        }

        debug!(target: "quiz.session.sequencer", quiz_code = %quiz.code, index = next, "Host advanced");
        self.broadcast_question(&quiz, next).await
    }

    /// Add a participant row and re-announce the room. A no-op for the host.
    ///
    /// # Errors
    ///
    /// - `QuizError::NotFound` - unknown code
    /// - `QuizError::Database` - the participant row could not be written
    pub async fn join(&self, code: &str, user: &UserProfile) -> Result<Quiz, QuizError> {
        let quiz = self.catalog.lookup(code).await?;
        if quiz.is_host(user.user_id) {
            return Ok(quiz);
        }

        self.repo.add_participant(quiz.id, user).await?;
        self.hub.announce_participants(&quiz.code).await?;

        info!(target: "quiz.session.sequencer", quiz_code = %quiz.code, user_id = user.user_id, "Participant joined");
        Ok(quiz)
    }

    /// Score an answer and schedule that user's follow-up delivery.
    ///
    /// Returns once the response and progress are stored. Delivery of the
    /// next question (or completion handling) runs on a spawned task.
    ///
    /// # Errors
    ///
    /// - `QuizError::NotFound` - unknown session id
    /// - `QuizError::BadRequest` - the session is not active, or the question
    ///   is not part of it
    /// - `QuizError::Database` - the response could not be stored
    pub async fn submit_answer(
        self: &Arc<Self>,
        user: &UserProfile,
        request: &SubmitAnswerRequest,
    ) -> Result<AnswerResponse, QuizError> {
        let quiz = self.catalog.by_id(request.quiz_id).await?;
        if quiz.status != SessionStatus::Active {
            debug!(target: "quiz.session.sequencer", quiz_code = %quiz.code, status = quiz.status.as_str(), "Answer for inactive session");
            return Err(QuizError::BadRequest("Quiz is not active".to_string()));
        }

        let outcome = self
            .tracker
            .record_answer(
                user,
                &quiz,
                request.question_id,
                &request.answer,
                request.time_spent,
            )
            .await?;

        if let Some(next_index) = outcome.next_index {
            let sequencer = Arc::clone(self);
            let user_id = user.user_id;
            tokio::spawn(async move {
                sequencer
                    .advance_participant(&quiz, user_id, next_index)
                    .await;
            });
        }

        Ok(AnswerResponse {
            score: outcome.score,
        })
    }

    /// Send a reconnecting participant the question at their stored index.
    pub async fn resume(&self, quiz: &Quiz, user_id: UserId) {
        if quiz.status != SessionStatus::Active || quiz.is_host(user_id) {
            return;
        }

        let index = match self.tracker.progress(quiz.id, user_id).await {
            Ok(index) => index,
            Err(e) => {
                warn!(target: "quiz.session.sequencer", quiz_code = %quiz.code, user_id = user_id, error = %e, "Failed to read progress on connect");
                return;
            }
        };

        if let Some(event) = question_event(quiz, index, false) {
            self.send_to_user(quiz, user_id, &event).await;
        }
    }

    async fn advance_participant(&self, quiz: &Quiz, user_id: UserId, next_index: usize) {
        match question_event(quiz, next_index, false) {
            Some(event) => self.send_to_user(quiz, user_id, &event).await,
            None => {
                if let Err(e) = self.evaluate_completion(quiz, user_id).await {
                    error!(
                        target: "quiz.session.sequencer",
                        quiz_code = %quiz.code,
                        user_id = user_id,
                        error = %e,
                        "Completion check failed"
                    );
                }
            }
        }
    }

    /// Publish the final leaderboard once every distinct responder has
    /// finished; otherwise tell this user to wait.
    ///
    /// Participants who joined but never answered are not counted.
    async fn evaluate_completion(&self, quiz: &Quiz, user_id: UserId) -> Result<(), QuizError> {
        let total = quiz.total_questions();
        let finished = self.repo.finished_count(quiz.id, total).await?;
        let responders = self.repo.unique_participant_count(quiz.id).await?;

        debug!(
            target: "quiz.session.sequencer",
            quiz_code = %quiz.code,
            finished = finished,
            responders = responders,
            "Evaluating completion"
        );

        if finished < responders {
            self.send_to_user(quiz, user_id, &ServerEvent::wait_for_others())
                .await;
            return Ok(());
        }

        let Some(activation) = self.claim_completion(quiz.id).await else {
            debug!(target: "quiz.session.sequencer", quiz_code = %quiz.code, "Completion already claimed");
            return Ok(());
        };

        // A finisher that read the counts before the run was dropped can
        // still claim a fresh entry.
        match self.catalog.by_id(quiz.id).await {
            Ok(current) if current.status == SessionStatus::Finished => {
                self.forget_run(quiz.id, activation).await;
                debug!(target: "quiz.session.sequencer", quiz_code = %quiz.code, "Session already finished");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                self.release_completion(quiz.id, activation).await;
                return Err(e);
            }
        }

        let ranking = match self.publisher.publish(quiz).await {
            Ok(ranking) => ranking,
            Err(e) => {
                self.release_completion(quiz.id, activation).await;
                return Err(e);
            }
        };

        if !self.is_current(quiz.id, activation).await {
            info!(
                target: "quiz.session.sequencer",
                quiz_code = %quiz.code,
                activation = activation,
                "Session restarted during publication; discarding leaderboard"
            );
            return Ok(());
        }

        self.hub
            .broadcast(&quiz.code, &ServerEvent::FinalLeaderboard(ranking))
            .await?;

        match self.repo.set_status(quiz.id, SessionStatus::Finished).await {
            Ok(()) => {
                let mut finished_quiz = quiz.clone();
                finished_quiz.status = SessionStatus::Finished;
                self.catalog.refresh(&finished_quiz).await;
                self.forget_run(quiz.id, activation).await;
            }
            Err(e) => {
                metrics::record_best_effort_failure("set_status");
                warn!(target: "quiz.session.sequencer", quiz_code = %quiz.code, error = %e, "Failed to mark session finished");
            }
        }

        info!(target: "quiz.session.sequencer", quiz_code = %quiz.code, activation = activation, "Session finished");
        Ok(())
    }

    async fn claim_completion(&self, quiz_id: QuizId) -> Option<u64> {
        let mut runs = self.runs.lock().await;
        let run = runs.entry(quiz_id).or_default();
        if run.completion_claimed {
            return None;
        }
        run.completion_claimed = true;
        Some(run.activation)
    }

    async fn release_completion(&self, quiz_id: QuizId, activation: u64) {
        let mut runs = self.runs.lock().await;
        if let Some(run) = runs.get_mut(&quiz_id) {
            if run.activation == activation {
                run.completion_claimed = false;
            }
        }
    }

    async fn is_current(&self, quiz_id: QuizId, activation: u64) -> bool {
        let runs = self.runs.lock().await;
        runs.get(&quiz_id).is_some_and(|run| run.activation == activation)
    }

    /// Drop the bookkeeping of a finished run unless a restart replaced it.
    async fn forget_run(&self, quiz_id: QuizId, activation: u64) {
        let mut runs = self.runs.lock().await;
        if runs.get(&quiz_id).is_some_and(|run| run.activation == activation) {
            runs.remove(&quiz_id);
        }
    }

    /// Number of sessions with completion bookkeeping in memory.
    pub async fn tracked_sessions(&self) -> usize {
        self.runs.lock().await.len()
    }

    async fn broadcast_question(&self, quiz: &Quiz, index: usize) -> Result<(), QuizError> {
        let (Some(host), Some(participant)) = (
            question_event(quiz, index, true),
            question_event(quiz, index, false),
        ) else {
            return Err(QuizError::Internal(format!(
                "question index {index} out of range"
            )));
        };

        self.hub
            .broadcast_by_role(&quiz.code, &host, &participant)
            .await
    }

    async fn send_to_user(&self, quiz: &Quiz, user_id: UserId, event: &ServerEvent) {
        if let Err(e) = self.hub.send_to_user(&quiz.code, user_id, event).await {
            warn!(
                target: "quiz.session.sequencer",
                quiz_code = %quiz.code,
                user_id = user_id,
                event = event.kind(),
                error = %e,
                "Targeted send failed"
            );
        }
    }
}

fn require_host(quiz: &Quiz, user_id: UserId) -> Result<(), QuizError> {
    if quiz.is_host(user_id) {
        Ok(())
    } else {
        Err(QuizError::Forbidden(
            "Only the quiz host can do this".to_string(),
        ))
    }
}

/// `question` event for `index`, or `None` past the last question.
fn question_event(quiz: &Quiz, index: usize, reveal_answer: bool) -> Option<ServerEvent> {
    quiz.question_at(index).map(|question| {
        ServerEvent::Question(QuestionPayload {
            question: question.view(reveal_answer),
            index,
            total: quiz.total_questions(),
            session_id: quiz.id,
        })
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::Question;
    use chrono::Utc;

    fn quiz() -> Quiz {
        Quiz {
            id: 3,
            code: "ABC123".to_string(),
            title: "Maths".to_string(),
            description: String::new(),
            creator_id: 1,
            status: SessionStatus::Pending,
            questions: vec![Question {
                id: 10,
                quiz_id: 3,
                position: 0,
                prompt: "2+2?".to_string(),
                options: vec!["3".to_string(), "4".to_string()],
                correct_answer: "4".to_string(),
                time_limit: 20,
            }],
            created_at: Utc::now(),
        }
    }

    fn payload(event: Option<ServerEvent>) -> QuestionPayload {
        match event {
            Some(ServerEvent::Question(payload)) => Some(payload),
            _ => None,
        }
        .expect("question event")
    }

    #[test]
    fn test_question_event_hides_answer_from_participants() {
        let quiz = quiz();

        let host = payload(question_event(&quiz, 0, true));
        assert_eq!(host.question.correct_answer.as_deref(), Some("4"));
        assert_eq!(host.total, 1);
        assert_eq!(host.session_id, 3);

        let participant = payload(question_event(&quiz, 0, false));
        assert!(participant.question.correct_answer.is_none());
    }

    #[test]
    fn test_question_event_past_end_is_none() {
        assert!(question_event(&quiz(), 1, false).is_none());
    }

    #[test]
    fn test_require_host() {
        let quiz = quiz();
        assert!(require_host(&quiz, 1).is_ok());
        assert!(matches!(
            require_host(&quiz, 2),
            Err(QuizError::Forbidden(_))
        ));
    }
}
