//! Rollup engine: reduces a finer tier into aligned coarser buckets.
//!
//! Only complete buckets are ever written: the processable window ends at
//! the bucket boundary containing `now`, exclusive. Windows are adaptive:
//! a short steady-state probe covers continuous live operation, a long
//! catch-up probe recovers from downtime in bounded chunks processed
//! oldest-first, so a crash mid-run leaves a resumable frontier.

use chrono::{DateTime, TimeZone, Utc};
use rollup_core::{
    backoff::backoff_delay, bucket_end, bucket_floor, reduction_for, AggregateRecord, BucketStats,
    CoreEvent, Error, EventBus, Resolution, Result, RollupConfig, Tier, TierSource, TimeRange,
};
use series_store::{DeletePredicate, SeriesStore};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use telemetry::metrics;
use tracing::{debug, info, warn};

use crate::deletion::DeletionQueue;

/// Why a tier run wrote nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No unaggregated source data in either probe window.
    NoData,
    /// Health check or probes failed; retried at the next tick.
    StoreUnavailable,
    /// The store answered probes but every chunk in the window failed.
    AllChunksFailed,
    /// Connection arbiter refused MEDIUM admission this cycle.
    ArbiterDenied,
}

/// Structured result of one tier run; the same shape is returned to the
/// scheduler and to manual-trigger callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierRunResult {
    pub tier: Tier,
    pub aggregates_written: u64,
    pub deletions_queued: u64,
    pub chunks_processed: u32,
    pub skipped: bool,
    pub reason: Option<SkipReason>,
}

impl TierRunResult {
    pub fn skipped(tier: Tier, reason: SkipReason) -> Self {
        Self {
            tier,
            aggregates_written: 0,
            deletions_queued: 0,
            chunks_processed: 0,
            skipped: true,
            reason: Some(reason),
        }
    }
}

/// Pure computation plus store I/O for one resolution tier.
pub struct RollupEngine {
    store: Arc<dyn SeriesStore>,
    deletion: DeletionQueue,
    events: EventBus,
    config: Arc<RollupConfig>,
}

impl RollupEngine {
    pub fn new(
        store: Arc<dyn SeriesStore>,
        deletion: DeletionQueue,
        events: EventBus,
        config: Arc<RollupConfig>,
    ) -> Self {
        Self {
            store,
            deletion,
            events,
            config,
        }
    }

    /// Roll the source tier of `resolution` up into complete buckets
    /// ending at the boundary containing `now`.
    pub async fn rollup_tier(&self, resolution: Resolution, now: DateTime<Utc>) -> TierRunResult {
        let tier = tier_of(resolution);
        let source = resolution.source();

        // Pre-flight: a store that fails its health probe is skipped
        // until the next scheduled tick.
        if !self.store.healthy().await {
            warn!(tier = %tier, "Store health check failed, skipping tier run");
            metrics().rollup_skipped.inc();
            return TierRunResult::skipped(tier, SkipReason::StoreUnavailable);
        }

        let window_end = bucket_floor(resolution, now);

        // Steady state: a couple of buckets back is enough when the
        // previous run completed on schedule.
        let steady_start = bucket_floor(resolution, window_end - self.config.steady_lookback(resolution));
        let steady = TimeRange::new(steady_start, window_end);

        let window = match self.probe_with_retry(source, steady).await {
            Err(e) => {
                warn!(tier = %tier, error = %e, "Probe failed, skipping tier run");
                metrics().rollup_skipped.inc();
                return TierRunResult::skipped(tier, SkipReason::StoreUnavailable);
            }
            Ok(n) if n > 0 => steady,
            Ok(_) => {
                // Nothing recent; look for backlog from downtime.
                let catchup_start =
                    bucket_floor(resolution, window_end - self.config.catchup_lookback());
                let catchup = TimeRange::new(catchup_start, window_end);
                match self.probe_with_retry(source, catchup).await {
                    Err(e) => {
                        warn!(tier = %tier, error = %e, "Catch-up probe failed, skipping tier run");
                        metrics().rollup_skipped.inc();
                        return TierRunResult::skipped(tier, SkipReason::StoreUnavailable);
                    }
                    Ok(0) => {
                        debug!(tier = %tier, "No unaggregated data, nothing to do");
                        metrics().rollup_skipped.inc();
                        return TierRunResult::skipped(tier, SkipReason::NoData);
                    }
                    Ok(n) => {
                        info!(tier = %tier, window = %catchup, rows = n, "Catch-up mode");
                        catchup
                    }
                }
            }
        };

        if window.is_empty() {
            metrics().rollup_skipped.inc();
            return TierRunResult::skipped(tier, SkipReason::NoData);
        }

        let mut written = 0u64;
        let mut chunks = 0u32;
        let mut failed_chunks = 0u32;
        let mut first_failure: Option<DateTime<Utc>> = None;

        // Oldest first, chunk boundaries aligned to bucket boundaries.
        let mut chunk_start = window.start;
        while chunk_start < window.end {
            let chunk_end = next_chunk_end(resolution, chunk_start, &self.config).min(window.end);
            let chunk = TimeRange::new(chunk_start, chunk_end);
            chunks += 1;

            match self.process_chunk(resolution, source, chunk).await {
                Ok(n) => written += n,
                Err(e) => {
                    // Partial progress is idempotent on re-run; keep going.
                    failed_chunks += 1;
                    first_failure.get_or_insert(chunk_start);
                    metrics().chunks_failed.inc();
                    warn!(tier = %tier, chunk = %chunk, error = %e, "Chunk failed, continuing");
                }
            }

            chunk_start = chunk_end;
            tokio::task::yield_now().await;
        }

        if chunks > 0 && failed_chunks == chunks {
            metrics().rollup_skipped.inc();
            warn!(tier = %tier, chunks, "Every chunk failed, retrying at the next tick");
            return TierRunResult {
                tier,
                aggregates_written: 0,
                deletions_queued: 0,
                chunks_processed: chunks,
                skipped: true,
                reason: Some(SkipReason::AllChunksFailed),
            };
        }

        metrics().rollup_runs.inc();
        metrics().aggregates_written.inc_by(written);

        // A failed chunk's source data has no coarser aggregate yet, so
        // retirement never reaches past the first failure.
        let safe_end = first_failure.unwrap_or(window.end);
        let deletions_queued = if written > 0 {
            self.queue_retirement(resolution, window, safe_end)
        } else {
            0
        };

        if written > 0 {
            self.events.publish(CoreEvent::RollupCompleted {
                tier,
                window,
                aggregates_written: written,
            });
        }

        info!(
            tier = %tier,
            window = %window,
            aggregates_written = written,
            chunks,
            failed_chunks,
            deletions_queued,
            "Tier rollup complete"
        );

        TierRunResult {
            tier,
            aggregates_written: written,
            deletions_queued,
            chunks_processed: chunks,
            skipped: false,
            reason: None,
        }
    }

    /// Safety net: retire source data older than its configured horizon,
    /// catching ranges whose normal post-rollup retirement was lost.
    pub async fn run_cleanup(&self, now: DateTime<Utc>) -> TierRunResult {
        let mut queued = 0u64;
        for source in [
            TierSource::Raw,
            TierSource::Aggregate(Resolution::FifteenMin),
            TierSource::Aggregate(Resolution::Hourly),
        ] {
            let Some(max_age) = self.config.cleanup.max_age(source) else {
                continue;
            };
            let cutoff = now - max_age;
            let range = TimeRange::new(epoch(), cutoff);
            let predicate = DeletePredicate::range(source, range);
            self.deletion
                .enqueue(predicate, format!("cleanup safety net up to {}", cutoff.to_rfc3339()));
            queued += 1;
        }

        info!(deletions_queued = queued, "Cleanup safety net queued");
        TierRunResult {
            tier: Tier::Cleanup,
            aggregates_written: 0,
            deletions_queued: queued,
            chunks_processed: 0,
            skipped: false,
            reason: None,
        }
    }

    /// Read, reduce, and replace one chunk. Returns records written.
    async fn process_chunk(
        &self,
        resolution: Resolution,
        source: TierSource,
        chunk: TimeRange,
    ) -> Result<u64> {
        let stats = self
            .with_timeout(self.store.read_bucket_stats(source, chunk, resolution))
            .await?;
        if stats.is_empty() {
            return Ok(0);
        }

        let records: Vec<AggregateRecord> = stats
            .iter()
            .map(|s| self.reduce(resolution, source, s))
            .collect();

        // Replace only the exact buckets being recreated, so buckets whose
        // source data was already retired survive untouched.
        let mut bucket_starts: Vec<DateTime<Utc>> =
            records.iter().map(|r| r.bucket_start).collect();
        bucket_starts.sort_unstable();
        bucket_starts.dedup();

        self.with_timeout(self.store.delete_exact_buckets(resolution, &bucket_starts))
            .await?;

        let outcome = self
            .with_timeout(self.store.insert_aggregates(&records))
            .await?;
        if outcome.rejected > 0 {
            metrics().insert_rejected.inc_by(outcome.rejected);
            warn!(
                tier = %resolution,
                rejected = outcome.rejected,
                "Some aggregate rows were rejected"
            );
        }
        Ok(outcome.inserted)
    }

    fn reduce(
        &self,
        resolution: Resolution,
        source: TierSource,
        stats: &BucketStats,
    ) -> AggregateRecord {
        let reduction = reduction_for(
            stats.key.signal_kind,
            stats.key.state_kind,
            source,
            &self.config.reset_thresholds,
        );
        AggregateRecord {
            bucket_start: stats.key.bucket_start,
            signal_id: stats.key.signal_id.clone(),
            signal_kind: stats.key.signal_kind,
            state_kind: stats.key.state_kind,
            resolution,
            value: reduction.apply(stats),
            avg: stats.avg,
            min: stats.min,
            max: stats.max,
            sample_count: stats.count,
            unit: stats.unit.clone(),
            quality: stats.quality_avg,
        }
    }

    /// Enqueue retirement of the source range just consumed, keeping the
    /// configured buffer of recent data for late-arriving samples.
    /// `safe_end` caps the range at the first chunk that failed to
    /// aggregate; data past it is not covered and must survive.
    fn queue_retirement(
        &self,
        resolution: Resolution,
        window: TimeRange,
        safe_end: DateTime<Utc>,
    ) -> u64 {
        if !self.config.retirement_enabled {
            return 0;
        }
        let Some(target) = resolution.retires() else {
            return 0;
        };
        let retire_end = (window.end - self.config.retirement_buffer()).min(safe_end);
        let range = TimeRange::new(window.start, retire_end);
        if range.is_empty() {
            return 0;
        }
        self.deletion.enqueue(
            DeletePredicate::range(target, range),
            format!("retire source of {} rollup {}", resolution, range),
        );
        1
    }

    /// Probe/count with bounded backoff retries on transient failures.
    async fn probe_with_retry(&self, source: TierSource, range: TimeRange) -> Result<u64> {
        let mut attempt = 0u32;
        loop {
            match self.with_timeout(self.store.probe_count(source, range)).await {
                Ok(n) => return Ok(n),
                Err(e) => {
                    if attempt >= self.config.probe_retries {
                        return Err(e);
                    }
                    let delay = backoff_delay(
                        attempt,
                        self.config.backoff_base(),
                        self.config.backoff_max(),
                    );
                    debug!(error = %e, attempt, delay_secs = delay.as_secs(), "Probe retry");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Every store operation carries a hard timeout; elapsing is a
    /// recoverable failure for the current chunk only.
    async fn with_timeout<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.store_timeout(), op).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout("store operation exceeded hard timeout")),
        }
    }
}

fn tier_of(resolution: Resolution) -> Tier {
    match resolution {
        Resolution::FifteenMin => Tier::FifteenMin,
        Resolution::Hourly => Tier::Hourly,
        Resolution::Daily => Tier::Daily,
        Resolution::Weekly => Tier::Weekly,
        Resolution::Monthly => Tier::Monthly,
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now)
}

/// Advance one chunk, landing on a bucket boundary. Buckets wider than
/// the configured chunk (weekly, monthly) advance one whole bucket.
fn next_chunk_end(
    resolution: Resolution,
    chunk_start: DateTime<Utc>,
    config: &RollupConfig,
) -> DateTime<Utc> {
    let candidate = bucket_floor(resolution, chunk_start + config.chunk(resolution));
    if candidate <= chunk_start {
        bucket_end(resolution, chunk_start)
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollup_core::config::ArbiterSettings;
    use rollup_core::{Sample, SignalKind, StateKind};
    use series_store::{ConnectionArbiter, MemoryStore};

    fn at(d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, mi, 0).unwrap()
    }

    fn sample(
        ts: DateTime<Utc>,
        id: &str,
        kind: SignalKind,
        state: StateKind,
        value: f64,
    ) -> Sample {
        Sample {
            timestamp: ts,
            signal_id: id.into(),
            signal_kind: kind,
            state_kind: state,
            value,
            unit: "u".into(),
            quality: 100,
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        deletion: DeletionQueue,
        engine: RollupEngine,
    }

    fn harness(config: RollupConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(config);
        let events = EventBus::default();
        let arbiter = Arc::new(ConnectionArbiter::new(
            store.clone(),
            ArbiterSettings::default(),
            events.clone(),
        ));
        let deletion = DeletionQueue::new(store.clone(), arbiter, events.clone(), config.clone());
        let engine = RollupEngine::new(store.clone(), deletion.clone(), events, config);
        Harness {
            store,
            deletion,
            engine,
        }
    }

    #[tokio::test]
    async fn counter_delta_rollup() {
        let h = harness(RollupConfig::default());
        h.store.push_samples(vec![
            sample(at(14, 10, 2), "m1", SignalKind::Energy, StateKind::CumulativeTotal, 10.0),
            sample(at(14, 10, 7), "m1", SignalKind::Energy, StateKind::CumulativeTotal, 12.0),
            sample(at(14, 10, 12), "m1", SignalKind::Energy, StateKind::CumulativeTotal, 15.0),
        ]);

        let result = h.engine.rollup_tier(Resolution::FifteenMin, at(14, 10, 20)).await;
        assert!(!result.skipped);
        assert_eq!(result.aggregates_written, 1);

        let records = h.store.aggregates_at(Resolution::FifteenMin);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].bucket_start, at(14, 10, 0));
        assert_eq!(records[0].value, 5.0);
        assert_eq!(records[0].min, 10.0);
        assert_eq!(records[0].max, 15.0);
        assert_eq!(records[0].sample_count, 3);
    }

    #[tokio::test]
    async fn in_progress_bucket_is_excluded() {
        let h = harness(RollupConfig::default());
        // All samples inside the bucket containing `now`.
        h.store.push_samples(vec![
            sample(at(14, 10, 16), "m1", SignalKind::Power, StateKind::Instantaneous, 100.0),
            sample(at(14, 10, 22), "m1", SignalKind::Power, StateKind::Instantaneous, 200.0),
        ]);

        let result = h.engine.rollup_tier(Resolution::FifteenMin, at(14, 10, 25)).await;
        assert!(result.skipped);
        assert_eq!(result.reason, Some(SkipReason::NoData));
        assert!(h.store.aggregates_at(Resolution::FifteenMin).is_empty());

        // Once `now` passes the bucket end, it aggregates.
        let result = h.engine.rollup_tier(Resolution::FifteenMin, at(14, 10, 31)).await;
        assert!(!result.skipped);
        let records = h.store.aggregates_at(Resolution::FifteenMin);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, 150.0);
    }

    #[tokio::test]
    async fn rollup_is_idempotent() {
        let h = harness(RollupConfig::default());
        h.store.push_samples(vec![
            sample(at(14, 10, 2), "m1", SignalKind::Energy, StateKind::CumulativeTotal, 10.0),
            sample(at(14, 10, 12), "m1", SignalKind::Energy, StateKind::CumulativeTotal, 15.0),
        ]);

        let first = h.engine.rollup_tier(Resolution::FifteenMin, at(14, 10, 20)).await;
        let before = h.store.aggregates_at(Resolution::FifteenMin);
        let second = h.engine.rollup_tier(Resolution::FifteenMin, at(14, 10, 20)).await;
        let after = h.store.aggregates_at(Resolution::FifteenMin);

        assert_eq!(first.aggregates_written, 1);
        assert_eq!(second.aggregates_written, 1);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn instantaneous_signals_average() {
        let h = harness(RollupConfig::default());
        h.store.push_samples(vec![
            sample(at(14, 10, 1), "p1", SignalKind::Power, StateKind::Instantaneous, 100.0),
            sample(at(14, 10, 6), "p1", SignalKind::Power, StateKind::Instantaneous, 200.0),
            sample(at(14, 10, 11), "p1", SignalKind::Power, StateKind::Instantaneous, 300.0),
        ]);

        h.engine.rollup_tier(Resolution::FifteenMin, at(14, 10, 20)).await;
        let records = h.store.aggregates_at(Resolution::FifteenMin);
        assert_eq!(records[0].value, 200.0);
    }

    #[tokio::test]
    async fn counter_reset_detected() {
        let h = harness(RollupConfig::default());
        h.store.push_samples(vec![
            sample(at(14, 10, 2), "m1", SignalKind::Energy, StateKind::CumulativeTotal, 150.0),
            sample(at(14, 10, 12), "m1", SignalKind::Energy, StateKind::CumulativeTotal, 5.0),
        ]);

        h.engine.rollup_tier(Resolution::FifteenMin, at(14, 10, 20)).await;
        let records = h.store.aggregates_at(Resolution::FifteenMin);
        assert_eq!(records[0].value, 5.0);
    }

    #[tokio::test]
    async fn period_total_passes_through_last() {
        let h = harness(RollupConfig::default());
        h.store.push_samples(vec![
            sample(at(14, 10, 2), "d1", SignalKind::Energy, StateKind::PeriodTotalDay, 3.0),
            sample(at(14, 10, 7), "d1", SignalKind::Energy, StateKind::PeriodTotalDay, 3.0),
            sample(at(14, 10, 12), "d1", SignalKind::Energy, StateKind::PeriodTotalDay, 7.0),
        ]);

        h.engine.rollup_tier(Resolution::FifteenMin, at(14, 10, 20)).await;
        let records = h.store.aggregates_at(Resolution::FifteenMin);
        assert_eq!(records[0].value, 7.0);
    }

    #[tokio::test]
    async fn hourly_sums_finer_counter_deltas() {
        let h = harness(RollupConfig::default());
        // One hour of 15-min counter deltas already aggregated.
        for (minute, delta) in [(0u32, 2.0), (15, 3.0), (30, 1.0), (45, 4.0)] {
            h.store.seed_aggregates(vec![AggregateRecord {
                bucket_start: at(14, 10, minute),
                signal_id: "m1".into(),
                signal_kind: SignalKind::Energy,
                state_kind: StateKind::CumulativeTotal,
                resolution: Resolution::FifteenMin,
                value: delta,
                avg: delta,
                min: delta,
                max: delta,
                sample_count: 3,
                unit: "u".into(),
                quality: 100.0,
            }]);
        }

        let result = h.engine.rollup_tier(Resolution::Hourly, at(14, 11, 5)).await;
        assert!(!result.skipped);
        let hourly = h.store.aggregates_at(Resolution::Hourly);
        assert_eq!(hourly.len(), 1);
        assert_eq!(hourly[0].bucket_start, at(14, 10, 0));
        // Coarser cumulative tiers sum the finer deltas, never
        // re-difference them.
        assert_eq!(hourly[0].value, 10.0);
    }

    #[tokio::test]
    async fn retirement_predicate_matches_consumed_range() {
        let config = RollupConfig {
            retirement_buffer_minutes: 15,
            ..RollupConfig::default()
        };
        let h = harness(config);
        h.store.push_samples(vec![
            sample(at(14, 10, 2), "m1", SignalKind::Energy, StateKind::CumulativeTotal, 10.0),
            sample(at(14, 10, 12), "m1", SignalKind::Energy, StateKind::CumulativeTotal, 15.0),
        ]);

        let result = h.engine.rollup_tier(Resolution::FifteenMin, at(14, 10, 20)).await;
        assert_eq!(result.deletions_queued, 1);

        let pending = h.deletion.pending();
        assert_eq!(pending.len(), 1);
        // Window was [09:45, 10:15), buffer 15min trims the end.
        assert_eq!(
            pending[0].predicate,
            DeletePredicate::range(
                TierSource::Raw,
                TimeRange::new(at(14, 9, 45), at(14, 10, 0)),
            )
        );
    }

    #[tokio::test]
    async fn retirement_disabled_queues_nothing() {
        let config = RollupConfig {
            retirement_enabled: false,
            ..RollupConfig::default()
        };
        let h = harness(config);
        h.store.push_samples(vec![
            sample(at(14, 10, 2), "m1", SignalKind::Energy, StateKind::CumulativeTotal, 10.0),
        ]);

        let result = h.engine.rollup_tier(Resolution::FifteenMin, at(14, 10, 20)).await;
        assert!(!result.skipped);
        assert_eq!(result.deletions_queued, 0);
        assert!(h.deletion.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failures_skip_store_unavailable() {
        let h = harness(RollupConfig::default());
        h.store.push_samples(vec![
            sample(at(14, 10, 2), "m1", SignalKind::Energy, StateKind::CumulativeTotal, 10.0),
        ]);
        // More failures than probe_retries allows.
        h.store.fail_next_probes(10);

        let result = h.engine.rollup_tier(Resolution::FifteenMin, at(14, 10, 20)).await;
        assert!(result.skipped);
        assert_eq!(result.reason, Some(SkipReason::StoreUnavailable));
        assert!(h.store.aggregates_at(Resolution::FifteenMin).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_retries_recover_from_transient_failures() {
        let h = harness(RollupConfig::default());
        h.store.push_samples(vec![
            sample(at(14, 10, 2), "m1", SignalKind::Energy, StateKind::CumulativeTotal, 10.0),
            sample(at(14, 10, 12), "m1", SignalKind::Energy, StateKind::CumulativeTotal, 15.0),
        ]);
        h.store.fail_next_probes(2);

        let result = h.engine.rollup_tier(Resolution::FifteenMin, at(14, 10, 20)).await;
        assert!(!result.skipped);
        assert_eq!(result.aggregates_written, 1);
    }

    #[tokio::test]
    async fn catchup_processes_backlog_in_chunks() {
        let h = harness(RollupConfig::default());
        // Backlog two days old: outside the steady window, inside catch-up.
        for hour in 0..6 {
            h.store.push_samples(vec![
                sample(at(12, hour, 2), "m1", SignalKind::Energy, StateKind::CumulativeTotal, hour as f64),
                sample(at(12, hour, 12), "m1", SignalKind::Energy, StateKind::CumulativeTotal, hour as f64 + 0.5),
            ]);
        }

        let result = h.engine.rollup_tier(Resolution::FifteenMin, at(14, 10, 20)).await;
        assert!(!result.skipped);
        assert_eq!(result.aggregates_written, 6);
        // 7 days of catch-up at 1h chunks.
        assert!(result.chunks_processed > 24);

        let records = h.store.aggregates_at(Resolution::FifteenMin);
        assert_eq!(records.len(), 6);
        // Oldest first.
        assert_eq!(records[0].bucket_start, at(12, 0, 0));
    }

    #[tokio::test]
    async fn failed_chunk_withholds_retirement_of_its_range() {
        let h = harness(RollupConfig::default());
        // Two-day-old backlog across three hours; the middle hour's read
        // will fail.
        for (hour, base) in [(10u32, 10.0), (11, 20.0), (12, 30.0)] {
            h.store.push_samples(vec![
                sample(at(12, hour, 5), "m1", SignalKind::Energy, StateKind::CumulativeTotal, base),
                sample(at(12, hour, 10), "m1", SignalKind::Energy, StateKind::CumulativeTotal, base + 2.0),
            ]);
        }
        h.store.fail_reads_overlapping(TimeRange::new(at(12, 11, 0), at(12, 12, 0)));

        let result = h.engine.rollup_tier(Resolution::FifteenMin, at(14, 10, 0)).await;
        assert!(!result.skipped);
        assert_eq!(result.aggregates_written, 2);

        // The failed hour produced no aggregate.
        let records = h.store.aggregates_at(Resolution::FifteenMin);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].bucket_start, at(12, 10, 0));
        assert_eq!(records[1].bucket_start, at(12, 12, 0));

        // Retirement stops at the failed chunk, so its source samples
        // stay available for the re-run.
        assert_eq!(result.deletions_queued, 1);
        let pending = h.deletion.pending();
        assert_eq!(
            pending[0].predicate,
            DeletePredicate::range(
                TierSource::Raw,
                TimeRange::new(at(7, 10, 0), at(12, 11, 0)),
            )
        );
    }

    #[tokio::test]
    async fn all_chunks_failing_is_not_an_outage() {
        let h = harness(RollupConfig::default());
        h.store.push_samples(vec![
            sample(at(14, 10, 2), "m1", SignalKind::Energy, StateKind::CumulativeTotal, 10.0),
            sample(at(14, 10, 12), "m1", SignalKind::Energy, StateKind::CumulativeTotal, 15.0),
        ]);
        h.store.fail_reads_overlapping(TimeRange::new(at(14, 9, 45), at(14, 10, 15)));

        let result = h.engine.rollup_tier(Resolution::FifteenMin, at(14, 10, 20)).await;
        assert!(result.skipped);
        assert_eq!(result.reason, Some(SkipReason::AllChunksFailed));
        assert_eq!(result.chunks_processed, 1);
        assert_eq!(result.deletions_queued, 0);
        assert!(h.deletion.pending().is_empty());
    }

    #[tokio::test]
    async fn rerun_preserves_buckets_with_retired_sources() {
        let h = harness(RollupConfig::default());
        // A bucket whose raw data is already gone.
        h.store.seed_aggregates(vec![AggregateRecord {
            bucket_start: at(14, 9, 45),
            signal_id: "m1".into(),
            signal_kind: SignalKind::Energy,
            state_kind: StateKind::CumulativeTotal,
            resolution: Resolution::FifteenMin,
            value: 2.0,
            avg: 11.0,
            min: 10.0,
            max: 12.0,
            sample_count: 2,
            unit: "u".into(),
            quality: 100.0,
        }]);
        // Fresh raw data for a different bucket.
        h.store.push_samples(vec![
            sample(at(14, 10, 2), "m1", SignalKind::Energy, StateKind::CumulativeTotal, 12.0),
            sample(at(14, 10, 12), "m1", SignalKind::Energy, StateKind::CumulativeTotal, 15.0),
        ]);

        h.engine.rollup_tier(Resolution::FifteenMin, at(14, 10, 20)).await;
        let records = h.store.aggregates_at(Resolution::FifteenMin);
        // The orphaned 09:45 bucket survives, 10:00 is created.
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].bucket_start, at(14, 9, 45));
        assert_eq!(records[0].value, 2.0);
        assert_eq!(records[1].bucket_start, at(14, 10, 0));
        assert_eq!(records[1].value, 3.0);
    }

    #[tokio::test]
    async fn cleanup_queues_safety_net_tasks() {
        let h = harness(RollupConfig::default());
        let result = h.engine.run_cleanup(at(14, 4, 0)).await;
        assert_eq!(result.tier, Tier::Cleanup);
        assert_eq!(result.deletions_queued, 3);

        let pending = h.deletion.pending();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].predicate.target, TierSource::Raw);
        // Raw horizon: 2 days.
        assert_eq!(pending[0].predicate.range.end, at(12, 4, 0));
    }

    #[tokio::test]
    async fn weekly_and_monthly_share_daily_source() {
        let h = harness(RollupConfig::default());
        // Daily aggregates for the first full week of April.
        for day in 1..=7 {
            h.store.seed_aggregates(vec![AggregateRecord {
                bucket_start: Utc.with_ymd_and_hms(2024, 4, day, 0, 0, 0).unwrap(),
                signal_id: "m1".into(),
                signal_kind: SignalKind::Energy,
                state_kind: StateKind::CumulativeTotal,
                resolution: Resolution::Daily,
                value: 1.0,
                avg: 1.0,
                min: 1.0,
                max: 1.0,
                sample_count: 96,
                unit: "u".into(),
                quality: 100.0,
            }]);
        }
        let now = Utc.with_ymd_and_hms(2024, 4, 8, 2, 0, 0).unwrap();

        let weekly = h.engine.rollup_tier(Resolution::Weekly, now).await;
        assert_eq!(weekly.aggregates_written, 1);
        // Weekly must not retire the shared daily source.
        assert_eq!(weekly.deletions_queued, 0);
        let records = h.store.aggregates_at(Resolution::Weekly);
        assert_eq!(
            records[0].bucket_start,
            Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(records[0].value, 7.0);
    }
}
