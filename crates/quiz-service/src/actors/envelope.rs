//! Wire envelope shared by both directions of a quiz WebSocket.
//!
//! Every frame is `{ "type": "<event-name>", "data": <payload> }`.

use crate::models::{LeaderboardEntry, QuestionId, QuestionView, QuizId, UserId, UserProfile};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Notice sent to a participant who finished before everyone else.
pub const WAIT_FOR_OTHERS_MESSAGE: &str =
    "You have finished the quiz. Please wait for other players to finish.";

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("invalid '{kind}' payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Number of connected participants (host excluded).
    ParticipantUpdate { count: usize },

    ParticipantList {
        participants: Vec<UserProfile>,
        count: usize,
        host: Option<UserProfile>,
    },

    Question(QuestionPayload),

    /// The host advanced past the last question.
    QuizEnd {},

    QuizEndWait { message: String },

    FinalLeaderboard(Vec<LeaderboardEntry>),

    AnswerUpdate {
        #[serde(rename = "userId")]
        user_id: UserId,
        #[serde(rename = "questionId")]
        question_id: QuestionId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionPayload {
    pub question: QuestionView,
    pub index: usize,
    pub total: usize,
    #[serde(rename = "sessionId")]
    pub session_id: QuizId,
}

impl ServerEvent {
    /// Wire name of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::ParticipantUpdate { .. } => "participant_update",
            ServerEvent::ParticipantList { .. } => "participant_list",
            ServerEvent::Question(_) => "question",
            ServerEvent::QuizEnd {} => "quiz_end",
            ServerEvent::QuizEndWait { .. } => "quiz_end_wait",
            ServerEvent::FinalLeaderboard(_) => "final_leaderboard",
            ServerEvent::AnswerUpdate { .. } => "answer_update",
        }
    }

    /// Serialize once into a frame that can be shared by every recipient.
    pub fn to_frame(&self) -> Result<Arc<str>, EnvelopeError> {
        serde_json::to_string(self)
            .map(Arc::from)
            .map_err(EnvelopeError::Encode)
    }

    pub fn wait_for_others() -> Self {
        ServerEvent::QuizEndWait {
            message: WAIT_FOR_OTHERS_MESSAGE.to_string(),
        }
    }
}

/// Messages clients send to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    JoinQuiz {
        user: UserProfile,
    },
    StartQuiz,
    AnswerSubmitted {
        quiz_code: String,
        question_id: QuestionId,
        answer: String,
        user_id: Option<UserId>,
    },
    NextQuestion {
        quiz_code: String,
        current_index: usize,
    },
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct JoinQuizData {
    user: UserProfile,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerSubmittedData {
    #[serde(default)]
    quiz_code: String,
    question_id: QuestionId,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    user_id: Option<UserId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextQuestionData {
    #[serde(default)]
    quiz_code: String,
    current_index: usize,
}

impl ClientMessage {
    /// Parse one inbound frame.
    pub fn parse(raw: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: RawEnvelope =
            serde_json::from_slice(raw).map_err(EnvelopeError::InvalidJson)?;

        match envelope.kind.as_str() {
            "join_quiz" => {
                let data: JoinQuizData = payload(&envelope.kind, envelope.data)?;
                Ok(ClientMessage::JoinQuiz { user: data.user })
            }
            "start_quiz" => Ok(ClientMessage::StartQuiz),
            "answer_submitted" => {
                let data: AnswerSubmittedData = payload(&envelope.kind, envelope.data)?;
                Ok(ClientMessage::AnswerSubmitted {
                    quiz_code: data.quiz_code,
                    question_id: data.question_id,
                    answer: data.answer,
                    user_id: data.user_id,
                })
            }
            "next_question" => {
                let data: NextQuestionData = payload(&envelope.kind, envelope.data)?;
                Ok(ClientMessage::NextQuestion {
                    quiz_code: data.quiz_code,
                    current_index: data.current_index,
                })
            }
            _ => Err(EnvelopeError::UnknownType(envelope.kind)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::JoinQuiz { .. } => "join_quiz",
            ClientMessage::StartQuiz => "start_quiz",
            ClientMessage::AnswerSubmitted { .. } => "answer_submitted",
            ClientMessage::NextQuestion { .. } => "next_question",
        }
    }
}

fn payload<T: DeserializeOwned>(kind: &str, data: serde_json::Value) -> Result<T, EnvelopeError> {
    serde_json::from_value(data).map_err(|source| EnvelopeError::InvalidPayload {
        kind: kind.to_string(),
        source,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to_json(event: &ServerEvent) -> serde_json::Value {
        serde_json::from_str(&event.to_frame().unwrap()).unwrap()
    }

    #[test]
    fn test_participant_update_shape() {
        let value = to_json(&ServerEvent::ParticipantUpdate { count: 3 });
        assert_eq!(value, json!({"type": "participant_update", "data": {"count": 3}}));
    }

    #[test]
    fn test_participant_list_shape() {
        let host = UserProfile {
            user_id: 1,
            username: "host".to_string(),
            email: String::new(),
        };
        let value = to_json(&ServerEvent::ParticipantList {
            participants: vec![],
            count: 0,
            host: Some(host),
        });

        assert_eq!(value["type"], "participant_list");
        assert_eq!(value["data"]["count"], 0);
        assert_eq!(value["data"]["host"]["userId"], 1);
    }

    #[test]
    fn test_quiz_end_has_empty_data() {
        let value = to_json(&ServerEvent::QuizEnd {});
        assert_eq!(value, json!({"type": "quiz_end", "data": {}}));
    }

    #[test]
    fn test_final_leaderboard_is_array() {
        let value = to_json(&ServerEvent::FinalLeaderboard(vec![LeaderboardEntry {
            username: "ada".to_string(),
            score: 1000,
        }]));
        assert_eq!(
            value,
            json!({"type": "final_leaderboard", "data": [{"username": "ada", "score": 1000}]})
        );
    }

    #[test]
    fn test_question_payload_shape() {
        let value = to_json(&ServerEvent::Question(QuestionPayload {
            question: QuestionView {
                id: 4,
                position: 0,
                prompt: "2+2?".to_string(),
                options: vec!["4".to_string(), "5".to_string()],
                time_limit: 30,
                correct_answer: None,
            },
            index: 0,
            total: 2,
            session_id: 9,
        }));

        assert_eq!(value["type"], "question");
        assert_eq!(value["data"]["index"], 0);
        assert_eq!(value["data"]["total"], 2);
        assert_eq!(value["data"]["sessionId"], 9);
        assert!(value["data"]["question"].get("correct_answer").is_none());
    }

    #[test]
    fn test_answer_update_and_wait_shapes() {
        let value = to_json(&ServerEvent::AnswerUpdate {
            user_id: 5,
            question_id: 8,
        });
        assert_eq!(
            value,
            json!({"type": "answer_update", "data": {"userId": 5, "questionId": 8}})
        );

        let value = to_json(&ServerEvent::wait_for_others());
        assert_eq!(value["type"], "quiz_end_wait");
        assert_eq!(value["data"]["message"], WAIT_FOR_OTHERS_MESSAGE);
    }

    #[test]
    fn test_kind_matches_serialized_type() {
        let events = [
            ServerEvent::ParticipantUpdate { count: 0 },
            ServerEvent::QuizEnd {},
            ServerEvent::wait_for_others(),
            ServerEvent::FinalLeaderboard(vec![]),
        ];
        for event in events {
            assert_eq!(to_json(&event)["type"], event.kind());
        }
    }

    #[test]
    fn test_parse_join_quiz() {
        let message = ClientMessage::parse(
            br#"{"type":"join_quiz","data":{"user":{"userId":7,"username":"ada","email":"a@x.io"}}}"#,
        )
        .unwrap();

        assert_eq!(
            message,
            ClientMessage::JoinQuiz {
                user: UserProfile {
                    user_id: 7,
                    username: "ada".to_string(),
                    email: "a@x.io".to_string(),
                }
            }
        );
    }

    #[test]
    fn test_parse_start_quiz_without_data() {
        assert_eq!(
            ClientMessage::parse(br#"{"type":"start_quiz"}"#).unwrap(),
            ClientMessage::StartQuiz
        );
    }

    #[test]
    fn test_parse_answer_submitted() {
        let message = ClientMessage::parse(
            br#"{"type":"answer_submitted","data":{"quizCode":"ABC123","questionId":3,"answer":"4","userId":7}}"#,
        )
        .unwrap();

        assert_eq!(
            message,
            ClientMessage::AnswerSubmitted {
                quiz_code: "ABC123".to_string(),
                question_id: 3,
                answer: "4".to_string(),
                user_id: Some(7),
            }
        );
    }

    #[test]
    fn test_parse_next_question() {
        let message = ClientMessage::parse(
            br#"{"type":"next_question","data":{"quizCode":"ABC123","currentIndex":1}}"#,
        )
        .unwrap();
        assert_eq!(message.kind(), "next_question");
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        assert!(matches!(
            ClientMessage::parse(b"not json"),
            Err(EnvelopeError::InvalidJson(_))
        ));
        assert!(matches!(
            ClientMessage::parse(br#"{"type":"dance"}"#),
            Err(EnvelopeError::UnknownType(ref kind)) if kind == "dance"
        ));
        assert!(matches!(
            ClientMessage::parse(br#"{"type":"next_question","data":{"currentIndex":-1}}"#),
            Err(EnvelopeError::InvalidPayload { .. })
        ));
        assert!(matches!(
            ClientMessage::parse(br#"{"type":"join_quiz","data":{}}"#),
            Err(EnvelopeError::InvalidPayload { .. })
        ));
    }
}
