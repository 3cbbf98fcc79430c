//! Core types, reduction policies, and configuration for the rollup engine.

pub mod backoff;
pub mod config;
pub mod error;
pub mod events;
pub mod policy;
pub mod signal;
pub mod tier;

pub use config::RollupConfig;
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus};
pub use policy::*;
pub use signal::*;
pub use tier::*;
