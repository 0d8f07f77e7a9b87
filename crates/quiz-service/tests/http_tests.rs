//! REST API integration tests.
//!
//! Requests go through the full router (auth, timeout, CORS, tracing and
//! metrics layers) with `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use quiz_service::models::{SessionStatus, UserId};
use quiz_test_utils::{
    expired_token, sign_token, InMemoryCache, InMemoryRepository, QuizFixture, TestEngine,
};
use serde_json::{json, Value};
use tower::ServiceExt;

const HOST: UserId = 1;
const ALICE: UserId = 2;

fn engine_with_quiz() -> (TestEngine, InMemoryRepository) {
    let repo = InMemoryRepository::new();
    repo.insert_quiz(
        QuizFixture::new("ABC123", HOST)
            .title("Maths")
            .question("2+2?", &["3", "4"], "4"),
    );
    let engine = TestEngine::new(repo.clone(), InMemoryCache::new());
    (engine, repo)
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> Result<(StatusCode, Value), anyhow::Error> {
    let response = app.clone().oneshot(req).await?;
    let status = response.status();
    let bytes = response.into_body().collect().await?.to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    Ok((status, body))
}

#[tokio::test]
async fn test_health_and_ready() -> Result<(), anyhow::Error> {
    let (engine, _) = engine_with_quiz();
    let app = engine.router();

    let (status, _) = send(&app, request(Method::GET, "/health", None, None)).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, request(Method::GET, "/ready", None, None)).await?;
    assert_eq!(status, StatusCode::OK);

    engine.state.health.set_not_ready();
    let (status, _) = send(&app, request(Method::GET, "/ready", None, None)).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    Ok(())
}

#[tokio::test]
async fn test_api_requires_valid_token() -> Result<(), anyhow::Error> {
    let (engine, _) = engine_with_quiz();
    let app = engine.router();

    let (status, body) = send(&app, request(Method::GET, "/api/quiz/ABC123", None, None)).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");

    let expired = expired_token(ALICE, "alice");
    let (status, _) = send(
        &app,
        request(Method::GET, "/api/quiz/ABC123", Some(&expired), None),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        request(Method::GET, "/api/quiz/ABC123", Some("not-a-jwt"), None),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn test_create_quiz() -> Result<(), anyhow::Error> {
    let (engine, repo) = engine_with_quiz();
    let app = engine.router();
    let token = sign_token(HOST, "host");

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/quiz",
            Some(&token),
            Some(json!({
                "title": "Geography",
                "questions": [
                    {"prompt": "Capital of France?", "options": ["Paris", "Rome"], "correct_answer": "Paris"},
                    {"text": "Capital of Italy?", "options": ["Paris", "Rome"], "correct_answer": "Rome", "time_limit": 15}
                ]
            })),
        ),
    )
    .await?;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["creator_id"], HOST);
    assert_eq!(body["questions"][0]["correct_answer"], "Paris");
    assert_eq!(body["questions"][0]["time_limit"], 30);
    assert_eq!(body["questions"][1]["time_limit"], 15);

    let code = body["code"].as_str().expect("code").to_string();
    assert_eq!(code.len(), 6);
    assert!(code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

    let id = body["id"].as_i64().expect("id");
    assert_eq!(repo.status(id), Some(SessionStatus::Pending));

    let (status, body) = send(
        &app,
        request(Method::GET, "/api/quiz/my-quizzes", Some(&token), None),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(2));

    Ok(())
}

#[tokio::test]
async fn test_create_quiz_rejects_bad_bodies() -> Result<(), anyhow::Error> {
    let (engine, _) = engine_with_quiz();
    let app = engine.router();
    let token = sign_token(HOST, "host");

    let malformed = Request::builder()
        .method(Method::POST)
        .uri("/api/quiz")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, malformed).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/api/quiz",
            Some(&token),
            Some(json!({"title": "No questions", "questions": []})),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/api/quiz",
            Some(&token),
            Some(json!({
                "title": "Bad answer",
                "questions": [{"prompt": "2+2?", "options": ["3", "4"], "correct_answer": "5"}]
            })),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_get_quiz_reveals_answers_to_host_only() -> Result<(), anyhow::Error> {
    let (engine, _) = engine_with_quiz();
    let app = engine.router();

    let host_token = sign_token(HOST, "host");
    let (status, body) = send(
        &app,
        request(Method::GET, "/api/quiz/ABC123", Some(&host_token), None),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Maths");
    assert_eq!(body["questions"][0]["correct_answer"], "4");

    let alice_token = sign_token(ALICE, "alice");
    let (status, body) = send(
        &app,
        request(Method::GET, "/api/quiz/ABC123", Some(&alice_token), None),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["questions"][0].get("correct_answer").is_none());

    let (status, body) = send(
        &app,
        request(Method::GET, "/api/quiz/ZZZ999", Some(&alice_token), None),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], "Quiz not found");

    Ok(())
}

#[tokio::test]
async fn test_join_and_start() -> Result<(), anyhow::Error> {
    let (engine, repo) = engine_with_quiz();
    let app = engine.router();
    let host_token = sign_token(HOST, "host");
    let alice_token = sign_token(ALICE, "alice");

    let (status, body) = send(
        &app,
        request(Method::POST, "/api/quiz/ABC123/join", Some(&alice_token), None),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "ABC123");
    let quiz_id = body["id"].as_i64().expect("id");
    assert_eq!(repo.participants(quiz_id).len(), 1);

    let (status, body) = send(
        &app,
        request(Method::POST, "/api/quiz/ABC123/start", Some(&alice_token), None),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, body) = send(
        &app,
        request(Method::POST, "/api/quiz/ABC123/start", Some(&host_token), None),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");
    assert_eq!(repo.status(quiz_id), Some(SessionStatus::Active));

    Ok(())
}

#[tokio::test]
async fn test_start_without_questions_is_rejected() -> Result<(), anyhow::Error> {
    let repo = InMemoryRepository::new();
    repo.insert_quiz(QuizFixture::new("EMPTY1", HOST));
    let engine = TestEngine::new(repo, InMemoryCache::new());
    let app = engine.router();

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/api/quiz/EMPTY1/start",
            Some(&sign_token(HOST, "host")),
            None,
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_submit_answer_and_leaderboard() -> Result<(), anyhow::Error> {
    let (engine, repo) = engine_with_quiz();
    let app = engine.router();
    let alice_token = sign_token(ALICE, "alice");
    let quiz = engine.state.catalog.lookup("ABC123").await?;
    let question = quiz.question_at(0).expect("question");

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/api/quiz/ABC123/start",
            Some(&sign_token(HOST, "host")),
            None,
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/quiz/answer",
            Some(&alice_token),
            Some(json!({
                "quiz_id": quiz.id,
                "question_id": question.id,
                "answer": "4",
                "time_spent": 3
            })),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"score": 970}));
    assert_eq!(repo.responses(quiz.id).len(), 1);

    let (status, body) = send(
        &app,
        request(
            Method::GET,
            "/api/quiz/ABC123/leaderboard",
            Some(&alice_token),
            None,
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"username": "alice", "score": 970}]));

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/api/quiz/answer",
            Some(&alice_token),
            Some(json!({"quiz_id": quiz.id})),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_is_public() -> Result<(), anyhow::Error> {
    let (engine, _) = engine_with_quiz();
    let app = engine.router();

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/metrics", None, None))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    Ok(())
}
