//! Tracing setup, component health, and in-process metrics.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::{
    ComponentHealth, ComponentHealthReport, HealthRegistry, HealthReport, HealthStatus,
};
pub use metrics::{metrics, Metrics, MetricsSnapshot};
pub use tracing_setup::{init_tracing, init_tracing_from_env, TracingConfig};
