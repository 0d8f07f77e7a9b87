//! Test harness for the coordination engine.
//!
//! - [`TestEngine`] wires the real hub, sequencer and router over the
//!   in-memory store and cache.
//! - [`FakeConnection`] registers a queue with the hub the way the WebSocket
//!   handler does, without a socket.
//! - [`TestQuizServer`] serves the real router on `127.0.0.1:0` for
//!   end-to-end WebSocket tests.

use crate::fixtures::TEST_JWT_SECRET;
use crate::memory_cache::InMemoryCache;
use crate::memory_repository::InMemoryRepository;
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use quiz_service::actors::{
    ConnectionId, ConnectionRegistration, HubActor, HubHandle, RegisterOutcome, Role,
};
use quiz_service::cache::QuizCache;
use quiz_service::config::Config;
use quiz_service::models::{Quiz, UserProfile};
use quiz_service::observability::HealthState;
use quiz_service::repositories::QuizRepository;
use quiz_service::routes::{self, AppState};
use quiz_service::session::{LeaderboardPublisher, ProgressTracker, QuizCatalog, SessionSequencer};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default wait used by [`FakeConnection`] helpers.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Config for tests. `overrides` replace or add environment variables.
pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    let mut vars = HashMap::from([
        (
            "DATABASE_URL".to_string(),
            "postgresql://test/test".to_string(),
        ),
        ("REDIS_URL".to_string(), "redis://localhost:6379".to_string()),
        ("JWT_SECRET".to_string(), TEST_JWT_SECRET.to_string()),
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("SHUTDOWN_DRAIN_SECONDS".to_string(), "0".to_string()),
    ]);
    for (key, value) in overrides {
        vars.insert((*key).to_string(), (*value).to_string());
    }
    Config::from_vars(&vars).expect("valid test config")
}

/// The engine as `main` wires it, over in-memory collaborators.
pub struct TestEngine {
    pub state: Arc<AppState>,
    pub repo: InMemoryRepository,
    pub cache: InMemoryCache,
    hub_token: CancellationToken,
    _hub_task: JoinHandle<()>,
}

impl TestEngine {
    pub fn new(repo: InMemoryRepository, cache: InMemoryCache) -> Self {
        Self::with_config(repo, cache, test_config(&[]))
    }

    pub fn with_config(repo: InMemoryRepository, cache: InMemoryCache, config: Config) -> Self {
        let store: Arc<dyn QuizRepository> = Arc::new(repo.clone());
        let cache_dyn: Arc<dyn QuizCache> = Arc::new(cache.clone());

        let catalog = QuizCatalog::new(
            Arc::clone(&store),
            Arc::clone(&cache_dyn),
            config.quiz_cache_ttl,
        );
        let tracker = ProgressTracker::new(Arc::clone(&store), Arc::clone(&cache_dyn));
        let publisher = LeaderboardPublisher::new(
            Arc::clone(&store),
            Arc::clone(&cache_dyn),
            config.leaderboard_ttl,
        );

        let hub_token = CancellationToken::new();
        let (hub, hub_task) = HubActor::spawn(
            Arc::new(tracker.clone()),
            config.hub_mailbox_capacity,
            hub_token.clone(),
        );

        let sequencer = Arc::new(SessionSequencer::new(
            catalog.clone(),
            Arc::clone(&store),
            tracker,
            publisher.clone(),
            hub.clone(),
        ));

        let health = Arc::new(HealthState::new());
        health.set_ready();

        let state = Arc::new(AppState {
            config,
            repo: store,
            catalog,
            sequencer,
            publisher,
            hub,
            health,
        });

        Self {
            state,
            repo,
            cache,
            hub_token,
            _hub_task: hub_task,
        }
    }

    pub fn hub(&self) -> &HubHandle {
        &self.state.hub
    }

    pub fn sequencer(&self) -> &Arc<SessionSequencer> {
        &self.state.sequencer
    }

    /// The real router with a Prometheus handle that is not installed globally.
    pub fn router(&self) -> Router {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        routes::build_routes(Arc::clone(&self.state), handle)
    }

    /// Register a socket-less connection for `user` in `quiz`'s room.
    pub async fn connect(&self, quiz: &Quiz, user: UserProfile) -> FakeConnection {
        self.connect_with_capacity(quiz, user, 64).await
    }

    pub async fn connect_with_capacity(
        &self,
        quiz: &Quiz,
        user: UserProfile,
        capacity: usize,
    ) -> FakeConnection {
        FakeConnection::register(self.hub().clone(), quiz, user, capacity).await
    }
}

impl Drop for TestEngine {
    fn drop(&mut self) {
        self.hub_token.cancel();
    }
}

/// A registered connection whose outbound queue is read directly.
pub struct FakeConnection {
    pub connection_id: ConnectionId,
    pub role: Role,
    pub outcome: RegisterOutcome,
    quiz_code: String,
    hub: HubHandle,
    receiver: mpsc::Receiver<Arc<str>>,
}

impl FakeConnection {
    pub async fn register(
        hub: HubHandle,
        quiz: &Quiz,
        user: UserProfile,
        capacity: usize,
    ) -> Self {
        let (tx, receiver) = mpsc::channel(capacity);
        let connection_id = uuid::Uuid::new_v4();
        let role = Role::for_user(quiz.creator_id, user.user_id);

        let outcome = hub
            .register(ConnectionRegistration {
                connection_id,
                quiz_code: quiz.code.clone(),
                quiz_id: quiz.id,
                user,
                role,
                outbound: tx,
            })
            .await
            .expect("hub registration");

        Self {
            connection_id,
            role,
            outcome,
            quiz_code: quiz.code.clone(),
            hub,
            receiver,
        }
    }

    /// Next frame, or `None` on timeout or a closed queue.
    pub async fn next_event(&mut self, timeout: Duration) -> Option<Value> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(frame)) => Some(serde_json::from_str(&frame).expect("frame is JSON")),
            _ => None,
        }
    }

    /// Skip frames until one of type `kind` arrives.
    pub async fn wait_for(&mut self, kind: &str) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = self.next_event(remaining).await?;
            if event["type"] == kind {
                return Some(event);
            }
        }
    }

    /// Every frame currently queued.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut events = Vec::new();
        while let Ok(frame) = self.receiver.try_recv() {
            events.push(serde_json::from_str(&frame).expect("frame is JSON"));
        }
        events
    }

    /// Frames of type `kind` received within `quiet`, stopping at the first gap.
    pub async fn collect(&mut self, kind: &str, quiet: Duration) -> Vec<Value> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event(quiet).await {
            if event["type"] == kind {
                events.push(event);
            }
        }
        events
    }

    /// Whether the hub has closed this connection's queue.
    pub async fn is_closed(&mut self) -> bool {
        loop {
            match tokio::time::timeout(EVENT_TIMEOUT, self.receiver.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }

    pub async fn disconnect(&self) {
        self.hub
            .unregister(&self.quiz_code, self.connection_id)
            .await
            .expect("hub unregister");
    }
}

/// Real server for end-to-end tests.
pub struct TestQuizServer {
    addr: SocketAddr,
    engine: TestEngine,
    _handle: JoinHandle<()>,
}

impl TestQuizServer {
    /// Spawn the router on a random local port.
    pub async fn spawn(engine: TestEngine) -> Result<Self, anyhow::Error> {
        let app = engine.router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            engine,
            _handle: handle,
        })
    }

    pub fn engine(&self) -> &TestEngine {
        &self.engine
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket URL for a session, authenticated via the `token` query parameter.
    pub fn ws_url(&self, code: &str, token: &str) -> String {
        format!("ws://{}/ws/{}?token={}", self.addr, code, token)
    }
}

impl Drop for TestQuizServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
