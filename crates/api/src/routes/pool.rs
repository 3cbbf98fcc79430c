//! Connection pool endpoints.

use axum::{extract::State, Json};

use crate::response::PoolStatsResponse;
use crate::state::AppState;

/// GET /pool/stats - Arbiter view of the connection budget.
pub async fn stats_handler(State(state): State<AppState>) -> Json<PoolStatsResponse> {
    Json(state.arbiter.snapshot().into())
}
