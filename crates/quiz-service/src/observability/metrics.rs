//! Metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `quiz_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded: `method` (HTTP verbs), `endpoint` (parameterized
//! paths), `status` (success/error/timeout), `role` (host/participant),
//! `result` (correct/incorrect/host_ignored), `reason` (bounded by code).

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used by `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("quiz_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("quiz_leaderboard_publish".to_string()),
            &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000],
        )
        .map_err(|e| format!("Failed to set leaderboard buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Metric: `quiz_http_requests_total`, `quiz_http_request_duration_seconds`
pub fn record_http_request(method: &str, path: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_endpoint(path);
    let status = categorize_status_code(status_code);

    histogram!("quiz_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint.clone(),
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("quiz_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Replace quiz codes with placeholders to bound label cardinality.
fn normalize_endpoint(path: &str) -> String {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();

    let normalized = match segments.as_slice() {
        ["health"] | ["ready"] | ["metrics"] => path,
        ["api", "quiz"] => "/api/quiz",
        ["api", "quiz", "my-quizzes"] => "/api/quiz/my-quizzes",
        ["api", "quiz", "answer"] => "/api/quiz/answer",
        ["api", "quiz", _] => "/api/quiz/{code}",
        ["api", "quiz", _, "start"] => "/api/quiz/{code}/start",
        ["api", "quiz", _, "join"] => "/api/quiz/{code}/join",
        ["api", "quiz", _, "leaderboard"] => "/api/quiz/{code}/leaderboard",
        ["ws", _] => "/ws/{code}",
        _ => "/other",
    };

    normalized.to_string()
}

// ============================================================================
// WebSocket Metrics
// ============================================================================

/// Metric: `quiz_ws_connections_active` (+1), `quiz_ws_connections_total`
pub fn record_connection_opened(role: &'static str) {
    gauge!("quiz_ws_connections_active").increment(1.0);
    counter!("quiz_ws_connections_total", "role" => role).increment(1);
}

/// Metric: `quiz_ws_connections_active` (-1)
pub fn record_connection_closed() {
    gauge!("quiz_ws_connections_active").decrement(1.0);
}

/// Metric: `quiz_ws_backpressure_drops_total`
pub fn record_backpressure_drop() {
    counter!("quiz_ws_backpressure_drops_total").increment(1);
}

/// Metric: `quiz_ws_malformed_messages_total`
pub fn record_malformed_message() {
    counter!("quiz_ws_malformed_messages_total").increment(1);
}

/// Metric: `quiz_rooms_active`
pub fn set_active_rooms(count: usize) {
    gauge!("quiz_rooms_active").set(count as f64);
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Metric: `quiz_answers_total`
pub fn record_answer(result: &'static str) {
    counter!("quiz_answers_total", "result" => result).increment(1);
}

/// Metric: `quiz_sessions_started_total`
pub fn record_session_started() {
    counter!("quiz_sessions_started_total").increment(1);
}

/// Metric: `quiz_leaderboards_published_total`, `quiz_leaderboard_publish_duration_seconds`
pub fn record_leaderboard_published(duration: Duration) {
    counter!("quiz_leaderboards_published_total").increment(1);
    histogram!("quiz_leaderboard_publish_duration_seconds").record(duration.as_secs_f64());
}

/// Metric: `quiz_best_effort_failures_total`
///
/// Store or cache failures that were logged and skipped.
pub fn record_best_effort_failure(reason: &'static str) {
    counter!("quiz_best_effort_failures_total", "reason" => reason).increment(1);
}
