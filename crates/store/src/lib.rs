//! Time-series store contract, backends, and the connection arbiter.

pub mod client;
pub mod config;
pub mod memory;
pub mod pool;
pub mod schema;
pub mod traits;

pub use client::ClickHouseStore;
pub use config::StoreConfig;
pub use memory::MemoryStore;
pub use pool::{ConnectionArbiter, PoolSnapshot, Priority};
pub use traits::{DeletePredicate, InsertOutcome, PoolStats, SeriesStore};
