//! HTTP middleware layers.
//!
//! - `auth` - identity token verification for protected routes
//! - `http_metrics` - request counters and latency for every response

pub mod auth;
pub mod http_metrics;

pub use auth::{require_user_auth, AuthState};
pub use http_metrics::http_metrics_middleware;
