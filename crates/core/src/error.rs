//! Unified error types for the rollup engine.
//!
//! Error codes:
//! - STORE_001-003: Backing store errors
//! - JOB_001-002: Job dispatch errors
//! - DEL_001: Deletion queue errors

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Store error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorCode {
    /// STORE_001: Store unreachable or health check failed
    Unavailable,
    /// STORE_002: Operation exceeded its hard timeout
    Timeout,
    /// STORE_003: Some rows in a batch were rejected
    PartialInsert,
}

impl StoreErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable => "STORE_001",
            Self::Timeout => "STORE_002",
            Self::PartialInsert => "STORE_003",
        }
    }
}

/// Job dispatch error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorCode {
    /// JOB_001: A job for this tier is already running or queued
    TierBusy,
    /// JOB_002: Connection arbiter denied admission
    ArbiterDenied,
}

impl JobErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TierBusy => "JOB_001",
            Self::ArbiterDenied => "JOB_002",
        }
    }
}

/// Unified error type for the rollup engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Backing store error with code.
    #[error("[{code}] {message}")]
    Store { code: &'static str, message: String },

    /// Job dispatch error with code.
    #[error("[{code}] {message}")]
    Job { code: &'static str, message: String },

    /// DEL_001: deletion task exhausted its retries.
    #[error("[DEL_001] deletion retries exhausted: {0}")]
    DeletionExhausted(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown tier: {0}")]
    UnknownTier(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a store error.
    pub fn store(code: StoreErrorCode, msg: impl Into<String>) -> Self {
        Self::Store {
            code: code.code(),
            message: msg.into(),
        }
    }

    /// Create a job dispatch error.
    pub fn job(code: JobErrorCode, msg: impl Into<String>) -> Self {
        Self::Job {
            code: code.code(),
            message: msg.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::store(StoreErrorCode::Unavailable, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::store(StoreErrorCode::Timeout, msg)
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the error code if this is a coded error.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::Store { code, .. } => Some(code),
            Self::Job { code, .. } => Some(code),
            Self::DeletionExhausted(_) => Some("DEL_001"),
            _ => None,
        }
    }

    /// Whether a retry at the same call site can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store { code, .. } if *code == "STORE_002"
        ) || matches!(self, Self::Query(_))
    }
}
