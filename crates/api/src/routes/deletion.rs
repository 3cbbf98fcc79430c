//! Deletion queue endpoints.

use axum::{extract::State, Json};
use worker::DeletionStats;

use crate::state::AppState;

/// GET /deletion/stats - Queue depth and lifetime counters.
pub async fn stats_handler(State(state): State<AppState>) -> Json<DeletionStats> {
    Json(state.deletion.stats())
}
