//! In-process metrics for rollup, deletion, and arbiter activity.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Engine-wide metrics registry.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Tier rollup runs that executed (not skipped).
    pub rollup_runs: Counter,
    /// Tier rollup runs skipped (no data, store down, arbiter denied).
    pub rollup_skipped: Counter,
    /// Aggregate records written across all tiers.
    pub aggregates_written: Counter,
    /// Rows rejected during batch inserts.
    pub insert_rejected: Counter,
    /// Catch-up chunks that failed and were skipped.
    pub chunks_failed: Counter,
    /// Deletion tasks executed to completion.
    pub deletions_processed: Counter,
    /// Deletion task attempts that failed.
    pub deletions_failed: Counter,
    /// Deletion tasks dropped after exhausting retries.
    pub deletions_abandoned: Counter,
    /// Rows removed by the deletion queue.
    pub rows_deleted: Counter,
    /// Admissions refused by the connection arbiter.
    pub arbiter_denials: Counter,
    /// Current deletion queue depth.
    pub deletion_queue_depth: Gauge,

    start_time_millis: AtomicU64,
}

/// Point-in-time copy of all metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub rollup_runs: u64,
    pub rollup_skipped: u64,
    pub aggregates_written: u64,
    pub insert_rejected: u64,
    pub chunks_failed: u64,
    pub deletions_processed: u64,
    pub deletions_failed: u64,
    pub deletions_abandoned: u64,
    pub rows_deleted: u64,
    pub arbiter_denials: u64,
    pub deletion_queue_depth: u64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rollup_runs: self.rollup_runs.get(),
            rollup_skipped: self.rollup_skipped.get(),
            aggregates_written: self.aggregates_written.get(),
            insert_rejected: self.insert_rejected.get(),
            chunks_failed: self.chunks_failed.get(),
            deletions_processed: self.deletions_processed.get(),
            deletions_failed: self.deletions_failed.get(),
            deletions_abandoned: self.deletions_abandoned.get(),
            rows_deleted: self.rows_deleted.get(),
            arbiter_denials: self.arbiter_denials.get(),
            deletion_queue_depth: self.deletion_queue_depth.get(),
        }
    }

    pub fn uptime_millis(&self) -> u64 {
        let start = self.start_time_millis.load(Ordering::Relaxed);
        if start == 0 {
            return 0;
        }
        now_millis().saturating_sub(start)
    }

    fn mark_start(&self) {
        self.start_time_millis.store(now_millis(), Ordering::Relaxed);
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

static METRICS: LazyLock<Metrics> = LazyLock::new(|| {
    let metrics = Metrics::default();
    metrics.mark_start();
    metrics
});

/// Global metrics registry.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
