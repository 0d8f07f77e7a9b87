//! Test utilities for the quiz service.
//!
//! # Modules
//!
//! - [`fixtures`] - quiz builders, identity tokens, departure recording
//! - [`memory_repository`] - in-memory persistent store
//! - [`memory_cache`] - in-memory cache
//! - [`server_harness`] - wired engine, fake connections and a real test server

pub mod fixtures;
pub mod memory_cache;
pub mod memory_repository;
pub mod server_harness;

pub use fixtures::*;
pub use memory_cache::InMemoryCache;
pub use memory_repository::InMemoryRepository;
pub use server_harness::{test_config, FakeConnection, TestEngine, TestQuizServer, EVENT_TIMEOUT};
