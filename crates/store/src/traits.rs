//! The backing-store contract.
//!
//! The engine talks to the store exclusively through [`SeriesStore`]:
//! range-filtered counts, server-side grouped reads, exact-bucket
//! replacement, bulk predicate deletes, and pool statistics for the
//! arbiter. Production uses ClickHouse; tests use the in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rollup_core::{AggregateRecord, BucketStats, Resolution, Result, TierSource, TimeRange};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection-pool usage as reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub in_use: u32,
    pub max: u32,
}

/// Outcome of a batch aggregate insert. Rejected rows are counted and
/// logged by the caller, never treated as job failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: u64,
    pub rejected: u64,
}

/// Filter for a bulk delete. Equality-comparable so retirement cascades
/// can be asserted in tests without executing them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePredicate {
    pub target: TierSource,
    pub range: TimeRange,
    /// Restrict to one signal; `None` matches all signals in range.
    pub signal_id: Option<String>,
}

impl DeletePredicate {
    pub fn range(target: TierSource, range: TimeRange) -> Self {
        Self {
            target,
            range,
            signal_id: None,
        }
    }
}

impl fmt::Display for DeletePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match self.target {
            TierSource::Raw => "raw".to_string(),
            TierSource::Aggregate(r) => r.to_string(),
        };
        match &self.signal_id {
            Some(id) => write!(f, "{} {} signal={}", target, self.range, id),
            None => write!(f, "{} {}", target, self.range),
        }
    }
}

/// Backing-store contract required by the rollup engine and the deletion
/// queue.
#[async_trait]
pub trait SeriesStore: Send + Sync {
    /// Cheap pre-job health probe.
    async fn healthy(&self) -> bool;

    /// Count rows of `source` within `range`.
    async fn probe_count(&self, source: TierSource, range: TimeRange) -> Result<u64>;

    /// Server-side grouped read: one [`BucketStats`] per (signal, bucket)
    /// with `bucket` alignment, over `source` rows in `range`.
    async fn read_bucket_stats(
        &self,
        source: TierSource,
        range: TimeRange,
        bucket: Resolution,
    ) -> Result<Vec<BucketStats>>;

    /// Remove aggregate records at `resolution` whose bucket start is in
    /// `bucket_starts` (exact timestamps only, never a range). Returns the
    /// number of rows removed.
    async fn delete_exact_buckets(
        &self,
        resolution: Resolution,
        bucket_starts: &[DateTime<Utc>],
    ) -> Result<u64>;

    /// Insert a batch of aggregate records.
    async fn insert_aggregates(&self, records: &[AggregateRecord]) -> Result<InsertOutcome>;

    /// Bulk delete matching `predicate`. Returns the number of rows
    /// removed.
    async fn delete_where(&self, predicate: &DeletePredicate) -> Result<u64>;

    /// Current connection-pool usage for the arbiter.
    fn pool_stats(&self) -> PoolStats;
}
