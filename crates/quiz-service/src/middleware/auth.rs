//! Authentication middleware for protected routes.
//!
//! Extracts the identity token, validates it, and injects [`Claims`] into
//! request extensions. Browsers cannot set headers on a WebSocket upgrade,
//! so a `token` query parameter is accepted when no Authorization header is
//! present.

use crate::auth::{Claims, JwtValidator};
use crate::errors::QuizError;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub jwt_validator: Arc<JwtValidator>,
}

/// Require a valid identity token.
///
/// # Response
///
/// - 401 Unauthorized with WWW-Authenticate header if the token is missing or invalid
/// - Continues to the next handler with [`Claims`] in extensions otherwise
#[instrument(skip_all, name = "quiz.middleware.auth")]
pub async fn require_user_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, QuizError> {
    let token = extract_bearer_token(req.headers())?
        .or_else(|| extract_query_token(req.uri().query()))
        .ok_or_else(|| {
            tracing::debug!(target: "quiz.middleware.auth", "Missing identity token");
            QuizError::InvalidToken("Missing Authorization header".to_string())
        })?;

    let claims = state.jwt_validator.validate(&token)?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Extract the bearer token from the Authorization header.
///
/// Returns `Ok(None)` when the header is absent and an error when it is
/// present but malformed.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<Option<String>, QuizError> {
    let Some(value) = headers.get("authorization") else {
        return Ok(None);
    };

    let value = value.to_str().map_err(|_| {
        tracing::debug!(target: "quiz.middleware.auth", "Non-ASCII Authorization header");
        QuizError::InvalidToken("Invalid Authorization header format".to_string())
    })?;

    value
        .strip_prefix("Bearer ")
        .map(|token| Some(token.trim().to_string()))
        .ok_or_else(|| {
            tracing::debug!(target: "quiz.middleware.auth", "Invalid Authorization header format");
            QuizError::InvalidToken("Invalid Authorization header format".to_string())
        })
}

/// Extract a `token` query parameter. JWTs are URL-safe, so no decoding is needed.
fn extract_query_token(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, value)| *key == "token" && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Extension, Router};
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use secrecy::SecretString;
    use tower::ServiceExt;

    const SECRET: &str = "middleware-secret";

    fn token(user_id: i64) -> String {
        let claims = Claims {
            user_id,
            username: "ada".to_string(),
            exp: chrono::Utc::now().timestamp() + 600,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn app() -> Router {
        let auth_state = Arc::new(AuthState {
            jwt_validator: Arc::new(JwtValidator::new(&SecretString::from(SECRET.to_string()))),
        });

        Router::new()
            .route(
                "/whoami",
                get(|Extension(claims): Extension<Claims>| async move {
                    claims.user_id.to_string()
                }),
            )
            .route_layer(middleware::from_fn_with_state(auth_state, require_user_auth))
    }

    #[test]
    fn test_auth_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AuthState>();
    }

    #[test]
    fn test_extract_query_token() {
        assert_eq!(
            extract_query_token(Some("a=1&token=abc.def&b=2")),
            Some("abc.def".to_string())
        );
        assert_eq!(extract_query_token(Some("token=")), None);
        assert_eq!(extract_query_token(None), None);
    }

    #[test]
    fn test_extract_bearer_token_rejects_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic Zm9vOmJhcg==".parse().unwrap());
        assert!(extract_bearer_token(&headers).is_err());

        assert!(extract_bearer_token(&HeaderMap::new()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_header_token_accepted() {
        let request = Request::builder()
            .uri("/whoami")
            .header("authorization", format!("Bearer {}", token(42)))
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_query_token_accepted() {
        let request = Request::builder()
            .uri(format!("/whoami?token={}", token(42)))
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let request = Request::builder()
            .uri("/whoami")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("WWW-Authenticate"));
    }
}
