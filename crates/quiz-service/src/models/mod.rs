//! Quiz data models.
//!
//! Sessions, questions, participant profiles and scoring. The question view
//! types control what each role sees: correct answers are only ever
//! serialized for the host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric user identity supplied by the identity service.
pub type UserId = i64;

/// Primary key of a quiz session.
pub type QuizId = i64;

/// Primary key of a question.
pub type QuestionId = i64;

/// Time budget applied when a question has none (or a non-positive one).
pub const DEFAULT_TIME_LIMIT_SECONDS: i32 = 30;

/// Score awarded for a correct answer submitted instantly.
pub const MAX_SCORE: i64 = 1000;

/// Points lost per elapsed second on a correct answer.
pub const TIME_PENALTY_PER_SECOND: i64 = 10;

/// Maximum number of questions in one quiz.
pub const MAX_QUESTIONS: usize = 100;

/// Maximum number of options per question.
pub const MAX_OPTIONS: usize = 10;

/// Maximum title length in characters.
pub const MAX_TITLE_LENGTH: usize = 200;

/// Lifecycle of a quiz session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
    Finished,
}

impl SessionStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::Finished => "finished",
        }
    }

    /// Parse the storage representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SessionStatus::Pending),
            "active" => Some(SessionStatus::Active),
            "finished" => Some(SessionStatus::Finished),
            _ => None,
        }
    }
}

/// A quiz session with its ordered questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: QuizId,
    pub code: String,
    pub title: String,
    pub description: String,
    pub creator_id: UserId,
    pub status: SessionStatus,
    /// Ordered by `position`.
    pub questions: Vec<Question>,
    pub created_at: DateTime<Utc>,
}

impl Quiz {
    /// Whether `user_id` created (and therefore hosts) this quiz.
    pub fn is_host(&self, user_id: UserId) -> bool {
        self.creator_id == user_id
    }

    pub fn total_questions(&self) -> usize {
        self.questions.len()
    }

    pub fn question_at(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    pub fn find_question(&self, question_id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    /// Client-facing view. Correct answers are included only when `reveal` is set.
    pub fn view(&self, reveal: bool) -> QuizView {
        QuizView {
            id: self.id,
            code: self.code.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            creator_id: self.creator_id,
            status: self.status,
            created_at: self.created_at,
            questions: self.questions.iter().map(|q| q.view(reveal)).collect(),
        }
    }
}

/// One question of a quiz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub quiz_id: QuizId,
    pub position: i32,
    pub prompt: String,
    /// Ordered option texts.
    pub options: Vec<String>,
    pub correct_answer: String,
    pub time_limit: i32,
}

impl Question {
    /// Time budget with the default applied to unset or non-positive values.
    pub fn effective_time_limit(&self) -> i32 {
        if self.time_limit > 0 {
            self.time_limit
        } else {
            DEFAULT_TIME_LIMIT_SECONDS
        }
    }

    pub fn view(&self, reveal_answer: bool) -> QuestionView {
        QuestionView {
            id: self.id,
            position: self.position,
            prompt: self.prompt.clone(),
            options: self.options.clone(),
            time_limit: self.effective_time_limit(),
            correct_answer: reveal_answer.then(|| self.correct_answer.clone()),
        }
    }
}

/// Question as delivered to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: QuestionId,
    pub position: i32,
    pub prompt: String,
    pub options: Vec<String>,
    pub time_limit: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
}

/// Quiz as delivered over the REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizView {
    pub id: QuizId,
    pub code: String,
    pub title: String,
    pub description: String,
    pub creator_id: UserId,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub questions: Vec<QuestionView>,
}

/// Display identity of a connected user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: String,
}

/// One row of a ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub username: String,
    pub score: i64,
}

/// A scored response ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResponse {
    pub quiz_id: QuizId,
    pub question_id: QuestionId,
    pub user_id: UserId,
    pub username: String,
    pub answer: String,
    pub score: i64,
    pub time_spent: i64,
}

/// Request body for `POST /api/quiz`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateQuizRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub questions: Vec<CreateQuestionRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateQuestionRequest {
    #[serde(alias = "text")]
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    #[serde(default)]
    pub time_limit: Option<i32>,
}

impl CreateQuizRequest {
    /// Validate the request before anything is persisted.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Title must not be empty".to_string());
        }
        if self.title.chars().count() > MAX_TITLE_LENGTH {
            return Err(format!(
                "Title must be at most {MAX_TITLE_LENGTH} characters"
            ));
        }
        if self.questions.is_empty() {
            return Err("A quiz needs at least one question".to_string());
        }
        if self.questions.len() > MAX_QUESTIONS {
            return Err(format!("A quiz can have at most {MAX_QUESTIONS} questions"));
        }

        for (index, question) in self.questions.iter().enumerate() {
            let number = index + 1;
            if question.prompt.trim().is_empty() {
                return Err(format!("Question {number} has an empty prompt"));
            }
            if question.options.is_empty() || question.options.len() > MAX_OPTIONS {
                return Err(format!(
                    "Question {number} must have between 1 and {MAX_OPTIONS} options"
                ));
            }
            if !question.options.contains(&question.correct_answer) {
                return Err(format!(
                    "Question {number}: correct answer must be one of the options"
                ));
            }
        }

        Ok(())
    }
}

/// Request body for `POST /api/quiz/answer`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitAnswerRequest {
    pub quiz_id: QuizId,
    pub question_id: QuestionId,
    pub answer: String,
    /// Seconds the participant took to answer.
    #[serde(default)]
    pub time_spent: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub score: i64,
}

/// Score an answer: exact match only, linear time penalty, floored at zero.
///
/// Negative elapsed times are treated as zero so a client cannot push the
/// score above [`MAX_SCORE`].
pub fn score_answer(answer: &str, correct_answer: &str, elapsed_seconds: i64) -> i64 {
    if answer != correct_answer {
        return 0;
    }

    let elapsed = elapsed_seconds.max(0);
    MAX_SCORE
        .saturating_sub(TIME_PENALTY_PER_SECOND.saturating_mul(elapsed))
        .max(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn question(time_limit: i32) -> Question {
        Question {
            id: 7,
            quiz_id: 1,
            position: 0,
            prompt: "Capital of France?".to_string(),
            options: vec!["Paris".to_string(), "Lyon".to_string()],
            correct_answer: "Paris".to_string(),
            time_limit,
        }
    }

    #[test]
    fn test_score_correct_instant_answer() {
        assert_eq!(score_answer("Paris", "Paris", 0), 1000);
    }

    #[test]
    fn test_score_linear_penalty() {
        assert_eq!(score_answer("Paris", "Paris", 1), 990);
        assert_eq!(score_answer("Paris", "Paris", 45), 550);
        assert_eq!(score_answer("Paris", "Paris", 100), 0);
    }

    #[test]
    fn test_score_floors_at_zero() {
        assert_eq!(score_answer("Paris", "Paris", 150), 0);
        assert_eq!(score_answer("Paris", "Paris", i64::MAX), 0);
    }

    #[test]
    fn test_score_incorrect_is_zero() {
        assert_eq!(score_answer("Lyon", "Paris", 0), 0);
        assert_eq!(score_answer("paris", "Paris", 0), 0);
        assert_eq!(score_answer("Paris ", "Paris", 0), 0);
    }

    #[test]
    fn test_score_negative_elapsed_is_clamped() {
        assert_eq!(score_answer("Paris", "Paris", -20), 1000);
    }

    #[test]
    fn test_time_limit_default_applied() {
        assert_eq!(question(0).effective_time_limit(), 30);
        assert_eq!(question(-5).effective_time_limit(), 30);
        assert_eq!(question(12).effective_time_limit(), 12);
    }

    #[test]
    fn test_question_view_withholds_answer() {
        let participant = serde_json::to_value(question(0).view(false)).unwrap();
        assert!(participant.get("correct_answer").is_none());
        assert_eq!(participant["time_limit"], 30);

        let host = serde_json::to_value(question(0).view(true)).unwrap();
        assert_eq!(host["correct_answer"], "Paris");
    }

    #[test]
    fn test_session_status_round_trip() {
        for status in [
            SessionStatus::Pending,
            SessionStatus::Active,
            SessionStatus::Finished,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("archived"), None);
    }

    #[test]
    fn test_user_profile_wire_names() {
        let profile: UserProfile =
            serde_json::from_str(r#"{"userId":42,"username":"ada"}"#).unwrap();
        assert_eq!(profile.user_id, 42);
        assert_eq!(profile.email, "");

        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["userId"], 42);
    }

    fn valid_request() -> CreateQuizRequest {
        CreateQuizRequest {
            title: "Geography".to_string(),
            description: String::new(),
            questions: vec![CreateQuestionRequest {
                prompt: "Capital of France?".to_string(),
                options: vec!["Paris".to_string(), "Lyon".to_string()],
                correct_answer: "Paris".to_string(),
                time_limit: None,
            }],
        }
    }

    #[test]
    fn test_create_request_validation() {
        assert!(valid_request().validate().is_ok());

        let mut blank_title = valid_request();
        blank_title.title = "   ".to_string();
        assert!(blank_title.validate().is_err());

        let mut no_questions = valid_request();
        no_questions.questions.clear();
        assert!(no_questions.validate().is_err());

        let mut bad_answer = valid_request();
        bad_answer.questions[0].correct_answer = "Marseille".to_string();
        let err = bad_answer.validate().unwrap_err();
        assert!(err.contains("Question 1"));
    }

    #[test]
    fn test_create_request_accepts_text_alias() {
        let request: CreateQuizRequest = serde_json::from_str(
            r#"{"title":"T","questions":[{"text":"Q?","options":["a"],"correct_answer":"a"}]}"#,
        )
        .unwrap();
        assert_eq!(request.questions[0].prompt, "Q?");
        assert!(request.validate().is_ok());
    }
}
