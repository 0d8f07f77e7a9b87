//! Quiz Service Library
//!
//! Real-time coordination for live quiz sessions: a host starts a session,
//! participants connect over WebSocket, answer at their own pace, and the
//! final leaderboard is published once everyone who answered has finished.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> session/*.rs -> repositories/*.rs, cache/*.rs
//!                        |                |
//!                        +-> actors/ (HubActor, connection pumps) <-+
//! ```
//!
//! # Modules
//!
//! - `actors` - Hub actor owning room membership and per-connection pumps
//! - `auth` - Identity token verification
//! - `cache` - Session and ranking cache (Redis)
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP and WebSocket handlers
//! - `middleware` - Authentication and HTTP metrics layers
//! - `models` - Data models and scoring
//! - `observability` - Prometheus metrics and health probes
//! - `repositories` - Persistent store (Postgres)
//! - `routes` - Axum router setup
//! - `session` - Session lookup, progress, sequencing and leaderboard

pub mod actors;
pub mod auth;
pub mod cache;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod session;
