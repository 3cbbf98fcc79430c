//! Health check endpoints.

use axum::{extract::State, http::StatusCode, Json};

use crate::response::HealthResponse;
use crate::state::AppState;

/// Refresh the store component from a live probe; workers own their own
/// registry entries.
async fn probe_store(state: &AppState) -> bool {
    let store_connected = state.store.healthy().await;
    if store_connected {
        state.health.store.set_healthy();
    } else {
        state.health.store.set_unhealthy("health probe failed");
    }
    store_connected
}

/// GET /health - Full health check.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let store_connected = probe_store(&state).await;
    let report = state.health.report();
    let snapshot = state.arbiter.snapshot();

    Json(HealthResponse {
        status: report.status,
        store_connected,
        components: report.components,
        deletion_queue_depth: state.deletion.stats().queue_depth,
        pool_usage_percent: snapshot.usage_percent,
    })
}

/// GET /health/ready - Readiness probe (store reachable).
pub async fn ready_handler(State(state): State<AppState>) -> StatusCode {
    probe_store(&state).await;
    if state.health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /health/live - Liveness probe (service is running).
pub async fn live_handler() -> StatusCode {
    StatusCode::OK
}
