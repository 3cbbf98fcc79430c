//! Deterministic in-memory [`SeriesStore`] for unit and integration tests.
//!
//! Grouping mirrors what the ClickHouse backend computes server side, and
//! the aggregate table enforces the composite-key uniqueness invariant:
//! duplicate inserts are rejected, not overwritten, so idempotence bugs in
//! the engine show up as rejected rows.

use crate::traits::{DeletePredicate, InsertOutcome, PoolStats, SeriesStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rollup_core::{
    bucket_floor, AggregateRecord, BucketStats, Error, GroupKey, Resolution, Result, Sample,
    TierSource, TimeRange,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Default)]
struct Inner {
    samples: Vec<Sample>,
    aggregates: Vec<AggregateRecord>,
}

/// In-memory backend with failure injection for retry-path tests.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    pool: Mutex<PoolStats>,
    healthy: AtomicBool,
    fail_probes: AtomicU32,
    fail_deletes: AtomicU32,
    fail_reads: Mutex<Option<TimeRange>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            pool: Mutex::new(PoolStats { in_use: 0, max: 10 }),
            healthy: AtomicBool::new(true),
            fail_probes: AtomicU32::new(0),
            fail_deletes: AtomicU32::new(0),
            fail_reads: Mutex::new(None),
        }
    }

    pub fn push_samples(&self, samples: impl IntoIterator<Item = Sample>) {
        self.inner.lock().samples.extend(samples);
    }

    pub fn seed_aggregates(&self, records: impl IntoIterator<Item = AggregateRecord>) {
        self.inner.lock().aggregates.extend(records);
    }

    pub fn sample_count(&self) -> usize {
        self.inner.lock().samples.len()
    }

    /// All aggregate records at one resolution, ordered by bucket then
    /// signal.
    pub fn aggregates_at(&self, resolution: Resolution) -> Vec<AggregateRecord> {
        let mut records: Vec<_> = self
            .inner
            .lock()
            .aggregates
            .iter()
            .filter(|r| r.resolution == resolution)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            (a.bucket_start, &a.signal_id).cmp(&(b.bucket_start, &b.signal_id))
        });
        records
    }

    pub fn set_pool(&self, in_use: u32, max: u32) {
        *self.pool.lock() = PoolStats { in_use, max };
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    /// The next `n` probe/count calls fail with a query error.
    pub fn fail_next_probes(&self, n: u32) {
        self.fail_probes.store(n, Ordering::Relaxed);
    }

    /// The next `n` bulk deletes fail with a query error.
    pub fn fail_next_deletes(&self, n: u32) {
        self.fail_deletes.store(n, Ordering::Relaxed);
    }

    /// Grouped reads whose range overlaps `range` fail with a query
    /// error until cleared with a fresh call.
    pub fn fail_reads_overlapping(&self, range: TimeRange) {
        *self.fail_reads.lock() = Some(range);
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n > 0).then(|| n - 1)
            })
            .is_ok()
    }
}

/// (timestamp, value, quality, unit) of one source row.
type SourceRow = (DateTime<Utc>, f64, f64, String);

fn collect_rows(
    inner: &Inner,
    source: TierSource,
    range: TimeRange,
) -> Vec<(GroupKey, SourceRow)> {
    let mut rows: Vec<(GroupKey, SourceRow)> = match source {
        TierSource::Raw => inner
            .samples
            .iter()
            .filter(|s| range.contains(s.timestamp))
            .map(|s| {
                (
                    GroupKey {
                        signal_id: s.signal_id.clone(),
                        signal_kind: s.signal_kind,
                        state_kind: s.state_kind,
                        bucket_start: s.timestamp,
                    },
                    (s.timestamp, s.value, s.quality as f64, s.unit.clone()),
                )
            })
            .collect(),
        TierSource::Aggregate(res) => inner
            .aggregates
            .iter()
            .filter(|r| r.resolution == res && range.contains(r.bucket_start))
            .map(|r| {
                (
                    GroupKey {
                        signal_id: r.signal_id.clone(),
                        signal_kind: r.signal_kind,
                        state_kind: r.state_kind,
                        bucket_start: r.bucket_start,
                    },
                    (r.bucket_start, r.value, r.quality, r.unit.clone()),
                )
            })
            .collect(),
    };
    rows.sort_by_key(|(_, (ts, ..))| *ts);
    rows
}

#[async_trait]
impl SeriesStore for MemoryStore {
    async fn healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    async fn probe_count(&self, source: TierSource, range: TimeRange) -> Result<u64> {
        if Self::take_failure(&self.fail_probes) {
            return Err(Error::query("injected probe failure"));
        }
        let inner = self.inner.lock();
        Ok(collect_rows(&inner, source, range).len() as u64)
    }

    async fn read_bucket_stats(
        &self,
        source: TierSource,
        range: TimeRange,
        bucket: Resolution,
    ) -> Result<Vec<BucketStats>> {
        if let Some(poison) = *self.fail_reads.lock() {
            if range.start < poison.end && poison.start < range.end {
                return Err(Error::query("injected read failure"));
            }
        }
        let inner = self.inner.lock();
        type MapKey = (String, &'static str, &'static str, DateTime<Utc>);
        let mut groups: BTreeMap<MapKey, (GroupKey, Vec<SourceRow>)> = BTreeMap::new();

        for (mut key, row) in collect_rows(&inner, source, range) {
            key.bucket_start = bucket_floor(bucket, row.0);
            let map_key = (
                key.signal_id.clone(),
                key.signal_kind.as_str(),
                key.state_kind.as_str(),
                key.bucket_start,
            );
            groups
                .entry(map_key)
                .or_insert_with(|| (key, Vec::new()))
                .1
                .push(row);
        }

        let stats = groups
            .into_values()
            .map(|(key, rows)| {
                let values: Vec<f64> = rows.iter().map(|r| r.1).collect();
                let count = values.len() as u64;
                let sum: f64 = values.iter().sum();
                BucketStats {
                    first: rows[0].1,
                    last: rows[rows.len() - 1].1,
                    sum,
                    avg: sum / count as f64,
                    min: values.iter().cloned().fold(f64::INFINITY, f64::min),
                    max: values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                    count,
                    quality_avg: rows.iter().map(|r| r.2).sum::<f64>() / count as f64,
                    unit: rows[0].3.clone(),
                    key,
                }
            })
            .collect();
        Ok(stats)
    }

    async fn delete_exact_buckets(
        &self,
        resolution: Resolution,
        bucket_starts: &[DateTime<Utc>],
    ) -> Result<u64> {
        let mut inner = self.inner.lock();
        let before = inner.aggregates.len();
        inner.aggregates.retain(|r| {
            r.resolution != resolution || !bucket_starts.contains(&r.bucket_start)
        });
        Ok((before - inner.aggregates.len()) as u64)
    }

    async fn insert_aggregates(&self, records: &[AggregateRecord]) -> Result<InsertOutcome> {
        let mut inner = self.inner.lock();
        let mut outcome = InsertOutcome::default();
        for record in records {
            let duplicate = inner.aggregates.iter().any(|r| {
                r.resolution == record.resolution
                    && r.bucket_start == record.bucket_start
                    && r.signal_id == record.signal_id
                    && r.signal_kind == record.signal_kind
                    && r.state_kind == record.state_kind
            });
            if duplicate {
                outcome.rejected += 1;
            } else {
                inner.aggregates.push(record.clone());
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    async fn delete_where(&self, predicate: &DeletePredicate) -> Result<u64> {
        if Self::take_failure(&self.fail_deletes) {
            return Err(Error::query("injected delete failure"));
        }
        let mut inner = self.inner.lock();
        let matches_signal =
            |id: &str| predicate.signal_id.as_deref().map_or(true, |s| s == id);
        let removed;
        match predicate.target {
            TierSource::Raw => {
                let before = inner.samples.len();
                inner.samples.retain(|s| {
                    !(predicate.range.contains(s.timestamp) && matches_signal(&s.signal_id))
                });
                removed = before - inner.samples.len();
            }
            TierSource::Aggregate(res) => {
                let before = inner.aggregates.len();
                inner.aggregates.retain(|r| {
                    !(r.resolution == res
                        && predicate.range.contains(r.bucket_start)
                        && matches_signal(&r.signal_id))
                });
                removed = before - inner.aggregates.len();
            }
        }
        Ok(removed as u64)
    }

    fn pool_stats(&self) -> PoolStats {
        *self.pool.lock()
    }
}
