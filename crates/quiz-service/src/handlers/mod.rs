//! HTTP and WebSocket request handlers.

pub mod metrics;
pub mod quizzes;
pub mod ws;

pub use metrics::metrics_handler;
pub use quizzes::{
    create_quiz, get_quiz, join_quiz, leaderboard, my_quizzes, start_quiz, submit_answer,
};
pub use ws::{quiz_socket, WsMessageHandler};
