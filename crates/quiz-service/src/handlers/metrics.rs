//! Prometheus metrics endpoint handler.
//!
//! `/metrics` is unauthenticated so Prometheus can scrape it. Labels carry
//! no user identities or session codes.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// Handler for GET /metrics
///
/// Returns 200 OK with the Prometheus text format:
/// ```text
/// # TYPE quiz_ws_connections_active gauge
/// quiz_ws_connections_active 12
/// ```
#[tracing::instrument(skip_all, name = "quiz.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
