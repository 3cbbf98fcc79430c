//! API routes.

pub mod deletion;
pub mod health;
pub mod pool;
pub mod rollup;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Creates the ops API router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/health/ready", get(health::ready_handler))
        .route("/health/live", get(health::live_handler))
        .route("/rollup/status", get(rollup::status_handler))
        .route("/rollup/trigger/:tier", post(rollup::trigger_handler))
        .route("/deletion/stats", get(deletion::stats_handler))
        .route("/pool/stats", get(pool::stats_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
