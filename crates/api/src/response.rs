//! Standardized API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use series_store::PoolSnapshot;
use telemetry::{ComponentHealthReport, HealthStatus};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub store_connected: bool,
    pub components: Vec<ComponentHealthReport>,
    pub deletion_queue_depth: usize,
    pub pool_usage_percent: f64,
}

/// Pool stats response wraps the snapshot so the JSON shape is stable
/// even if the internal snapshot grows fields.
#[derive(Debug, Serialize, Deserialize)]
pub struct PoolStatsResponse {
    pub in_use: u32,
    pub max: u32,
    pub usage_percent: f64,
    pub effective_usage_percent: f64,
    pub available: bool,
}

impl From<PoolSnapshot> for PoolStatsResponse {
    fn from(s: PoolSnapshot) -> Self {
        Self {
            in_use: s.in_use,
            max: s.max,
            usage_percent: s.usage_percent,
            effective_usage_percent: s.effective_usage_percent,
            available: s.available,
        }
    }
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }
}

/// API error type carrying an HTTP status and a stable error code.
pub struct ApiError {
    pub status: StatusCode,
    pub response: ErrorResponse,
}

impl ApiError {
    pub fn with_code(status: StatusCode, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status,
            response: ErrorResponse::new(msg, code),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::BAD_REQUEST, "VALID_001", msg)
    }

    pub fn conflict(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::CONFLICT, code, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::INTERNAL_SERVER_ERROR, "STORE_001", msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.response)).into_response()
    }
}

impl From<rollup_core::Error> for ApiError {
    fn from(err: rollup_core::Error) -> Self {
        use rollup_core::Error;
        match &err {
            // A tier already queued or running is a conflict, not a failure.
            Error::Job { code, message } if *code == "JOB_001" => {
                ApiError::conflict(*code, message)
            }
            Error::Job { code, message } => {
                ApiError::with_code(StatusCode::SERVICE_UNAVAILABLE, *code, message)
            }
            Error::UnknownTier(tier) => {
                ApiError::bad_request(format!("unknown tier: {}", tier))
            }
            Error::Store { code, message } => {
                ApiError::with_code(StatusCode::INTERNAL_SERVER_ERROR, *code, message)
            }
            _ => ApiError::internal(err.to_string()),
        }
    }
}
