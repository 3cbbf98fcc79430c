//! Rollup scheduler endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use rollup_core::Tier;
use tracing::info;
use worker::{TierRunResult, TierStatus};

use crate::response::ApiError;
use crate::state::AppState;

/// GET /rollup/status - Per-tier schedule, queue, and last-run view.
pub async fn status_handler(State(state): State<AppState>) -> Json<Vec<TierStatus>> {
    Json(state.scheduler.status())
}

/// POST /rollup/trigger/:tier - Run one tier now, through the same code
/// path a scheduled job takes, and return its structured result.
///
/// 400 for an unknown tier name, 409 when the tier is already queued or
/// running.
pub async fn trigger_handler(
    State(state): State<AppState>,
    Path(tier): Path<String>,
) -> Result<Json<TierRunResult>, ApiError> {
    let tier = Tier::parse(&tier)
        .ok_or_else(|| ApiError::bad_request(format!("unknown tier: {}", tier)))?;

    info!(tier = %tier, "Manual rollup trigger");
    let result = state.scheduler.run_now(tier).await?;
    Ok(Json(result))
}
