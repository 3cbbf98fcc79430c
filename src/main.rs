//! Atrium Rollup Engine
//!
//! Multi-resolution rollup and retention pipeline:
//! - Per-signal-kind reduction of raw samples into 15-min through monthly tiers
//! - Wall-clock tier scheduling with a concurrency-capped priority queue
//! - Background retirement of superseded source data with backoff retries
//! - Connection-budget arbitration so live ingestion always outranks maintenance

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};

use api::{router, AppState};
use rollup_core::{EventBus, RollupConfig};
use series_store::{ClickHouseStore, ConnectionArbiter, SeriesStore, StoreConfig};
use telemetry::{init_tracing_from_env, HealthRegistry};
use worker::{DeletionQueue, RollupEngine, RollupScheduler};

/// Application configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,

    #[serde(default)]
    store: StoreConfig,

    #[serde(default)]
    rollup: RollupConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            store: StoreConfig::default(),
            rollup: RollupConfig::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    init_tracing_from_env();

    info!("Starting Atrium Rollup Engine v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = load_config()?;
    let rollup_config = Arc::new(config.rollup.clone());

    info!(
        url = %config.store.url,
        database = %config.store.database,
        pool_size = config.store.pool_size,
        "Loaded store config"
    );

    // Initialize the ClickHouse-backed series store
    let store =
        ClickHouseStore::new(config.store.clone()).context("Failed to create ClickHouse store")?;

    // Initialize schema
    if let Err(e) = store.init_schema().await {
        error!("Failed to initialize ClickHouse schema: {}", e);
        // Continue anyway - schema might already exist
    }
    let store: Arc<dyn SeriesStore> = Arc::new(store);

    let health = Arc::new(HealthRegistry::new());
    if store.healthy().await {
        info!("ClickHouse connection: healthy");
        health.store.set_healthy();
    } else {
        error!("ClickHouse connection: unhealthy");
        health.store.set_unhealthy("connection check failed at startup");
    }

    // Wire the pipeline: arbiter -> deletion queue -> engine -> scheduler
    let events = EventBus::default();
    let arbiter = Arc::new(ConnectionArbiter::new(
        store.clone(),
        rollup_config.arbiter,
        events.clone(),
    ));
    let deletion = DeletionQueue::new(
        store.clone(),
        arbiter.clone(),
        events.clone(),
        rollup_config.clone(),
    );
    let _deletion_handle = deletion.spawn();
    health.deletion.set_healthy();

    let engine = Arc::new(RollupEngine::new(
        store.clone(),
        deletion.clone(),
        events.clone(),
        rollup_config.clone(),
    ));
    let scheduler = RollupScheduler::new(engine, arbiter.clone(), rollup_config.clone());
    let _scheduler_handles = scheduler.spawn();
    health.scheduler.set_healthy();
    info!(
        concurrency = rollup_config.concurrency,
        "Started tier scheduler"
    );

    // Create application state and router
    let state = AppState::new(
        store.clone(),
        scheduler.clone(),
        deletion.clone(),
        arbiter,
        health.clone(),
    );
    let app = router(state);

    // Start HTTP server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid server address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Cleanup
    info!("Shutting down...");
    scheduler.shutdown();
    health.scheduler.set_unhealthy("shutdown requested");
    deletion.shutdown();
    health.deletion.set_unhealthy("shutdown requested");

    info!("Shutdown complete");
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("ROLLUP")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // Manual overrides for nested store config from environment
    // The config crate's nested parsing doesn't work reliably with underscored field names
    if let Ok(url) = std::env::var("ROLLUP_STORE_URL") {
        config.store.url = url;
    }
    if let Ok(database) = std::env::var("ROLLUP_STORE_DATABASE") {
        config.store.database = database;
    }
    if let Ok(username) = std::env::var("ROLLUP_STORE_USERNAME") {
        config.store.username = Some(username);
    }
    if let Ok(password) = std::env::var("ROLLUP_STORE_PASSWORD") {
        config.store.password = Some(password);
    }
    if let Ok(pool_size) = std::env::var("ROLLUP_STORE_POOL_SIZE") {
        config.store.pool_size = pool_size
            .parse()
            .context("ROLLUP_STORE_POOL_SIZE must be an integer")?;
    }

    Ok(config)
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
