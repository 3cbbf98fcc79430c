//! Application state shared across handlers.

use series_store::{ConnectionArbiter, SeriesStore};
use std::sync::Arc;
use telemetry::HealthRegistry;
use worker::{DeletionQueue, RollupScheduler};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Backing series store (ClickHouse in production, memory in tests).
    pub store: Arc<dyn SeriesStore>,
    /// Tier scheduler handle.
    pub scheduler: RollupScheduler,
    /// Background deletion queue handle.
    pub deletion: DeletionQueue,
    /// Connection-budget arbiter.
    pub arbiter: Arc<ConnectionArbiter>,
    /// Component health registry.
    pub health: Arc<HealthRegistry>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SeriesStore>,
        scheduler: RollupScheduler,
        deletion: DeletionQueue,
        arbiter: Arc<ConnectionArbiter>,
        health: Arc<HealthRegistry>,
    ) -> Self {
        Self {
            store,
            scheduler,
            deletion,
            arbiter,
            health,
        }
    }
}
