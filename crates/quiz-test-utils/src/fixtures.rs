//! Fixture builders, identity tokens and departure recording.

use quiz_service::actors::DepartureHandler;
use quiz_service::auth::Claims;
use quiz_service::models::{Question, Quiz, QuizId, SessionStatus, UserId, UserProfile};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// HS256 secret shared by [`sign_token`] and the test server config.
pub const TEST_JWT_SECRET: &str = "quiz-test-secret-0123456789abcdef";

/// Builder for quizzes stored through `InMemoryRepository::insert_quiz`.
///
/// # Example
///
/// ```rust,ignore
/// let fixture = QuizFixture::new("ABC123", HOST_ID)
///     .question("2+2?", &["3", "4"], "4")
///     .question("Capital of France?", &["Paris", "Rome"], "Paris");
/// ```
#[derive(Debug, Clone)]
pub struct QuizFixture {
    code: String,
    creator_id: UserId,
    title: String,
    status: SessionStatus,
    questions: Vec<(String, Vec<String>, String, i32)>,
}

impl QuizFixture {
    pub fn new(code: &str, creator_id: UserId) -> Self {
        Self {
            code: code.to_string(),
            creator_id,
            title: format!("Quiz {code}"),
            status: SessionStatus::Pending,
            questions: Vec::new(),
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn question(mut self, prompt: &str, options: &[&str], correct: &str) -> Self {
        self.questions.push((
            prompt.to_string(),
            options.iter().map(|o| (*o).to_string()).collect(),
            correct.to_string(),
            30,
        ));
        self
    }

    /// Quiz with unassigned (zero) ids.
    pub fn build(self) -> Quiz {
        Quiz {
            id: 0,
            code: self.code,
            title: self.title,
            description: String::new(),
            creator_id: self.creator_id,
            status: self.status,
            questions: self
                .questions
                .into_iter()
                .enumerate()
                .map(|(position, (prompt, options, correct_answer, time_limit))| Question {
                    id: 0,
                    quiz_id: 0,
                    position: position as i32,
                    prompt,
                    options,
                    correct_answer,
                    time_limit,
                })
                .collect(),
            created_at: chrono::Utc::now(),
        }
    }
}

pub fn profile(user_id: UserId, username: &str) -> UserProfile {
    UserProfile {
        user_id,
        username: username.to_string(),
        email: format!("{username}@example.com"),
    }
}

/// Sign an identity token accepted by the test server.
pub fn sign_token(user_id: UserId, username: &str) -> String {
    sign_claims(&Claims {
        user_id,
        username: username.to_string(),
        exp: chrono::Utc::now().timestamp() + 3600,
    })
}

/// Sign a token that expired an hour ago.
pub fn expired_token(user_id: UserId, username: &str) -> String {
    sign_claims(&Claims {
        user_id,
        username: username.to_string(),
        exp: chrono::Utc::now().timestamp() - 3600,
    })
}

fn sign_claims(claims: &Claims) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        claims,
        &jsonwebtoken::EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("sign test token")
}

/// Records every departure the hub reports.
#[derive(Clone, Default)]
pub struct RecordingDepartures {
    seen: Arc<Mutex<Vec<(String, QuizId, UserId)>>>,
}

impl RecordingDepartures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn departures(&self) -> Vec<(String, QuizId, UserId)> {
        self.seen.lock().unwrap().clone()
    }

    /// Wait until at least `count` departures were recorded or `timeout` passes.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<(String, QuizId, UserId)> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let seen = self.departures();
            if seen.len() >= count || tokio::time::Instant::now() >= deadline {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait::async_trait]
impl DepartureHandler for RecordingDepartures {
    async fn participant_left(&self, quiz_code: String, quiz_id: QuizId, user_id: UserId) {
        self.seen.lock().unwrap().push((quiz_code, quiz_id, user_id));
    }
}
