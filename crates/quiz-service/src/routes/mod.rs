//! HTTP routes for the quiz service.
//!
//! Defines the Axum router and application state.

use crate::actors::HubHandle;
use crate::auth::JwtValidator;
use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_user_auth, AuthState};
use crate::observability::{health_router, HealthState};
use crate::repositories::QuizRepository;
use crate::session::{LeaderboardPublisher, QuizCatalog, SessionSequencer};
use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowHeaders, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Persistent store.
    pub repo: Arc<dyn QuizRepository>,

    /// Cache-aside session lookup.
    pub catalog: QuizCatalog,

    pub sequencer: Arc<SessionSequencer>,

    pub publisher: LeaderboardPublisher,

    /// Handle to the hub actor owning room membership.
    pub hub: HubHandle,

    /// Liveness/readiness flags.
    pub health: Arc<HealthState>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health`, `/ready` - probes (public)
/// - `/metrics` - Prometheus metrics (public)
/// - `/api/quiz/...` - session REST endpoints (authenticated, 30 s timeout)
/// - `/ws/{code}` - WebSocket upgrade (authenticated, no timeout)
/// - CORS for the configured front-end origin
/// - TraceLayer for request logging
/// - HTTP metrics middleware (outermost)
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let jwt_validator = Arc::new(JwtValidator::new(&state.config.jwt_secret));
    let auth_state = Arc::new(AuthState { jwt_validator });

    // Public routes (no authentication required)
    let public_routes = health_router(Arc::clone(&state.health));

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Protected REST routes. The timeout applies here only so long-lived
    // WebSocket upgrades are not cut off.
    let api_routes = Router::new()
        .route("/api/quiz", post(handlers::create_quiz))
        .route("/api/quiz/my-quizzes", get(handlers::my_quizzes))
        .route("/api/quiz/answer", post(handlers::submit_answer))
        .route("/api/quiz/:code", get(handlers::get_quiz))
        .route("/api/quiz/:code/join", post(handlers::join_quiz))
        .route("/api/quiz/:code/start", post(handlers::start_quiz))
        .route("/api/quiz/:code/leaderboard", get(handlers::leaderboard))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&auth_state),
            require_user_auth,
        ))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(Arc::clone(&state));

    let ws_routes = Router::new()
        .route("/ws/:code", get(handlers::quiz_socket))
        .route_layer(middleware::from_fn_with_state(
            auth_state,
            require_user_auth,
        ))
        .with_state(Arc::clone(&state));

    // Layer order (bottom-to-top execution):
    // 1. CorsLayer - answer preflight, add CORS headers (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(api_routes)
        .merge(ws_routes)
        .layer(cors_layer(&state.config.cors_allowed_origin))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware))
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    match HeaderValue::from_str(origin) {
        Ok(value) => layer.allow_origin(value),
        Err(e) => {
            warn!(target: "quiz.routes", error = %e, "Invalid CORS origin, cross-origin requests disabled");
            layer
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn test_cors_layer_accepts_invalid_origin() {
        // Builds without panicking; the origin is simply not allowed.
        let _ = cors_layer("bad\norigin");
        let _ = cors_layer("http://localhost:3000");
    }
}
