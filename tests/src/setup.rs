//! Common test setup functions.

use api::{router, AppState};
use axum::Router;
use rollup_core::{EventBus, RollupConfig};
use series_store::{ConnectionArbiter, MemoryStore, SeriesStore};
use std::sync::Arc;
use telemetry::HealthRegistry;
use worker::{DeletionQueue, RollupEngine, RollupScheduler};

/// Test context wiring the full pipeline over an in-memory store.
///
/// This exercises the production code paths by:
/// - Using the real Axum router with all middleware
/// - Using the real engine, scheduler, deletion queue, and arbiter
/// - Swapping only the backing store for the in-memory implementation
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub config: Arc<RollupConfig>,
    pub events: EventBus,
    pub arbiter: Arc<ConnectionArbiter>,
    pub deletion: DeletionQueue,
    pub engine: Arc<RollupEngine>,
    pub scheduler: RollupScheduler,
    pub health: Arc<HealthRegistry>,
    pub router: Router,
}

impl TestContext {
    /// Create a test context with default configuration.
    pub fn new() -> Self {
        Self::with_config(RollupConfig::default())
    }

    /// Create a test context with custom configuration.
    pub fn with_config(config: RollupConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(config);
        let events = EventBus::default();

        let arbiter = Arc::new(ConnectionArbiter::new(
            store.clone() as Arc<dyn SeriesStore>,
            config.arbiter,
            events.clone(),
        ));
        let deletion = DeletionQueue::new(
            store.clone(),
            arbiter.clone(),
            events.clone(),
            config.clone(),
        );
        let engine = Arc::new(RollupEngine::new(
            store.clone(),
            deletion.clone(),
            events.clone(),
            config.clone(),
        ));
        let scheduler = RollupScheduler::new(engine.clone(), arbiter.clone(), config.clone());

        // Workers are driven directly by the tests, so their components
        // start healthy; the store entry tracks the live probe.
        let health = Arc::new(HealthRegistry::new());
        health.store.set_healthy();
        health.scheduler.set_healthy();
        health.deletion.set_healthy();

        let state = AppState::new(
            store.clone() as Arc<dyn SeriesStore>,
            scheduler.clone(),
            deletion.clone(),
            arbiter.clone(),
            health.clone(),
        );
        let router = router(state);

        Self {
            store,
            config,
            events,
            arbiter,
            deletion,
            engine,
            scheduler,
            health,
            router,
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
