//! Quiz Service
//!
//! Entry point for the live quiz coordination service.

use quiz_service::actors::HubActor;
use quiz_service::cache::{QuizCache, RedisQuizCache};
use quiz_service::config::Config;
use quiz_service::observability::{metrics, HealthState};
use quiz_service::repositories::{PgQuizRepository, QuizRepository};
use quiz_service::routes::{self, AppState};
use quiz_service::session::{LeaderboardPublisher, ProgressTracker, QuizCatalog, SessionSequencer};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quiz_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Quiz Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        outbound_queue_capacity = config.transport.outbound_queue_capacity,
        ping_interval_secs = config.transport.ping_interval.as_secs(),
        "Configuration loaded successfully"
    );

    let metrics_handle = metrics::init_metrics_recorder().map_err(|e| {
        error!("Failed to install metrics recorder: {}", e);
        e
    })?;

    let health = Arc::new(HealthState::new());

    // Initialize database connection pool with query timeout
    info!("Connecting to database...");
    let db_url_with_timeout = add_query_timeout(config.database_url.expose_secret(), 5);
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&db_url_with_timeout)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| {
            error!("Failed to run migrations: {}", e);
            e
        })?;

    info!("Database connection established");

    info!("Connecting to Redis...");
    let cache = RedisQuizCache::connect(config.redis_url.expose_secret())
        .await
        .map_err(|e| {
            error!("Failed to connect to Redis: {}", e);
            e
        })?;
    info!("Redis connection established");

    let repo: Arc<dyn QuizRepository> = Arc::new(PgQuizRepository::new(db_pool));
    let cache: Arc<dyn QuizCache> = Arc::new(cache);

    // Wire the coordination engine
    let catalog = QuizCatalog::new(Arc::clone(&repo), Arc::clone(&cache), config.quiz_cache_ttl);
    let tracker = ProgressTracker::new(Arc::clone(&repo), Arc::clone(&cache));
    let publisher =
        LeaderboardPublisher::new(Arc::clone(&repo), Arc::clone(&cache), config.leaderboard_ttl);

    let hub_token = CancellationToken::new();
    let (hub, hub_task) = HubActor::spawn(
        Arc::new(tracker.clone()),
        config.hub_mailbox_capacity,
        hub_token.clone(),
    );

    let sequencer = Arc::new(SessionSequencer::new(
        catalog.clone(),
        Arc::clone(&repo),
        tracker,
        publisher.clone(),
        hub.clone(),
    ));

    let bind_address = config.bind_address.clone();
    let drain_period = config.shutdown_drain_period;

    let state = Arc::new(AppState {
        config,
        repo,
        catalog,
        sequencer,
        publisher,
        hub,
        health: Arc::clone(&health),
    });

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    health.set_ready();
    info!("Quiz Service listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            Arc::clone(&health),
            drain_period,
            hub_token,
        ))
        .await?;

    if let Err(e) = hub_task.await {
        warn!("Hub actor task failed: {}", e);
    }

    info!("Quiz Service shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
///
/// Flips readiness, waits out the drain period, then cancels the hub, which
/// closes every WebSocket.
async fn shutdown_signal(health: Arc<HealthState>, drain: Duration, hub_token: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    health.set_not_ready();

    if drain.is_zero() {
        info!("Skipping drain period (SHUTDOWN_DRAIN_SECONDS=0)");
    } else {
        warn!("Draining for {} seconds...", drain.as_secs());
        tokio::time::sleep(drain).await;
        info!("Drain period complete");
    }

    hub_token.cancel();
}

/// Adds statement_timeout to the database URL.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}options=-c%20statement_timeout%3D{}s",
        url, separator, timeout_secs
    )
}
