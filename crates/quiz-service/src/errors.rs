//! Quiz service error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Error messages returned to clients are intentionally generic for store and
//! cache failures. Actual errors are logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Quiz service error type.
///
/// Maps to HTTP status codes:
/// - Database, Cache, Internal: 500 Internal Server Error
/// - InvalidToken: 401 Unauthorized
/// - Forbidden: 403 Forbidden
/// - NotFound: 404 Not Found
/// - Conflict: 409 Conflict
/// - BadRequest: 400 Bad Request
#[derive(Debug, Error)]
pub enum QuizError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QuizError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            QuizError::Database(_) | QuizError::Cache(_) | QuizError::Internal(_) => 500,
            QuizError::InvalidToken(_) => 401,
            QuizError::Forbidden(_) => 403,
            QuizError::NotFound(_) => 404,
            QuizError::Conflict(_) => 409,
            QuizError::BadRequest(_) => 400,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for QuizError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            QuizError::Database(err) => {
                tracing::error!(target: "quiz.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            QuizError::Cache(err) => {
                tracing::error!(target: "quiz.cache", error = %err, "Cache operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CACHE_ERROR",
                    "An internal cache error occurred".to_string(),
                )
            }
            QuizError::InvalidToken(reason) => {
                (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", reason.clone())
            }
            QuizError::NotFound(resource) => (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone()),
            QuizError::Conflict(reason) => (StatusCode::CONFLICT, "CONFLICT", reason.clone()),
            QuizError::Forbidden(reason) => (StatusCode::FORBIDDEN, "FORBIDDEN", reason.clone()),
            QuizError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            QuizError::Internal(reason) => {
                tracing::error!(target: "quiz.internal", reason = %reason, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) = "Bearer realm=\"quiz-api\", error=\"invalid_token\"".parse() {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

/// Convert sqlx errors to QuizError
impl From<sqlx::Error> for QuizError {
    fn from(err: sqlx::Error) -> Self {
        QuizError::Database(err.to_string())
    }
}

/// Convert redis errors to QuizError
impl From<redis::RedisError> for QuizError {
    fn from(err: redis::RedisError) -> Self {
        QuizError::Cache(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            QuizError::Database("connection failed".to_string()).to_string(),
            "Database error: connection failed"
        );
        assert_eq!(
            QuizError::NotFound("quiz".to_string()).to_string(),
            "Not found: quiz"
        );
        assert_eq!(
            QuizError::Forbidden("host only".to_string()).to_string(),
            "Forbidden: host only"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(QuizError::Database("test".to_string()).status_code(), 500);
        assert_eq!(QuizError::Cache("test".to_string()).status_code(), 500);
        assert_eq!(QuizError::Internal("test".to_string()).status_code(), 500);
        assert_eq!(QuizError::InvalidToken("test".to_string()).status_code(), 401);
        assert_eq!(QuizError::Forbidden("test".to_string()).status_code(), 403);
        assert_eq!(QuizError::NotFound("test".to_string()).status_code(), 404);
        assert_eq!(QuizError::Conflict("test".to_string()).status_code(), 409);
        assert_eq!(QuizError::BadRequest("test".to_string()).status_code(), 400);
    }

    #[tokio::test]
    async fn test_into_response_database_error_is_generic() {
        let response = QuizError::Database("password auth failed for user".to_string())
            .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "DATABASE_ERROR");
        assert_eq!(
            body_json["error"]["message"],
            "An internal database error occurred"
        );
    }

    #[tokio::test]
    async fn test_into_response_cache_error_is_generic() {
        let response = QuizError::Cache("connection refused".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "CACHE_ERROR");
    }

    #[tokio::test]
    async fn test_into_response_invalid_token_sets_www_authenticate() {
        let response = QuizError::InvalidToken("token expired".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let www_auth = response
            .headers()
            .get("WWW-Authenticate")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(www_auth.contains("Bearer realm=\"quiz-api\""));

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "INVALID_TOKEN");
        assert_eq!(body_json["error"]["message"], "token expired");
    }

    #[tokio::test]
    async fn test_into_response_forbidden() {
        let response =
            QuizError::Forbidden("Only the host can start the quiz".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "FORBIDDEN");
        assert_eq!(
            body_json["error"]["message"],
            "Only the host can start the quiz"
        );
    }

    #[tokio::test]
    async fn test_into_response_internal_hides_reason() {
        let response = QuizError::Internal("channel send failed".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body_json["error"]["message"], "An internal error occurred");
    }
}
