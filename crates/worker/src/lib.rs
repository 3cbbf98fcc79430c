//! Background workers for the rollup engine.
//!
//! - Rollup engine: reduces a finer tier into aligned coarser buckets
//! - Scheduler: per-tier timers feeding a priority job queue
//! - Deletion queue: paced retirement of superseded finer-grained data

pub mod deletion;
pub mod engine;
pub mod scheduler;

pub use deletion::{DeletionQueue, DeletionStats, DeletionTask, TaskState};
pub use engine::{RollupEngine, SkipReason, TierRunResult};
pub use scheduler::{RollupScheduler, TierStatus};
