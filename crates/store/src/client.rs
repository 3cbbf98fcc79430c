//! ClickHouse-backed [`SeriesStore`].
//!
//! Timestamps travel as epoch milliseconds (`DateTime64(3)` wire format is
//! a plain Int64), so row structs stay free of time-crate glue. Grouping
//! and reduction statistics are computed server side; the engine never
//! pulls raw rows for a window.

use crate::config::StoreConfig;
use crate::traits::{DeletePredicate, InsertOutcome, PoolStats, SeriesStore};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use clickhouse::{Client, Row};
use rollup_core::{
    AggregateRecord, BucketStats, Error, GroupKey, Resolution, Result, SignalKind, StateKind,
    TierSource, TimeRange,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// ClickHouse store with in-flight accounting for the arbiter.
///
/// The HTTP client has no native pool introspection, so `in_use` is the
/// number of store operations currently in flight, bounded in practice by
/// the configured pool size.
#[derive(Clone)]
pub struct ClickHouseStore {
    inner: Client,
    config: StoreConfig,
    in_flight: Arc<AtomicU32>,
}

/// Decrements the in-flight gauge on every exit path.
struct InFlightGuard(Arc<AtomicU32>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Row, Serialize)]
struct AggregateRow {
    bucket_start: i64, // milliseconds since epoch
    signal_id: String,
    signal_kind: String,
    state_kind: String,
    resolution_minutes: u32,
    value: f64,
    avg: f64,
    min: f64,
    max: f64,
    sample_count: u64,
    unit: String,
    quality: f64,
}

impl From<&AggregateRecord> for AggregateRow {
    fn from(r: &AggregateRecord) -> Self {
        Self {
            bucket_start: r.bucket_start.timestamp_millis(),
            signal_id: r.signal_id.clone(),
            signal_kind: r.signal_kind.as_str().to_string(),
            state_kind: r.state_kind.as_str().to_string(),
            resolution_minutes: r.resolution.minutes(),
            value: r.value,
            avg: r.avg,
            min: r.min,
            max: r.max,
            sample_count: r.sample_count,
            unit: r.unit.clone(),
            quality: r.quality,
        }
    }
}

#[derive(Debug, Clone, Row, Deserialize)]
struct StatsRow {
    signal_id: String,
    signal_kind: String,
    state_kind: String,
    bucket_start: i64,
    first: f64,
    last: f64,
    sum: f64,
    avg: f64,
    min: f64,
    max: f64,
    count: u64,
    quality_avg: f64,
    unit: String,
}

impl ClickHouseStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let mut client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database);

        if let Some(ref user) = config.username {
            client = client.with_user(user);
        }

        if let Some(ref pass) = config.password {
            client = client.with_password(pass);
        }

        info!(
            url = %config.url,
            database = %config.database,
            "Created ClickHouse store"
        );

        Ok(Self {
            inner: client,
            config,
            in_flight: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Create the database and both tables if missing.
    pub async fn init_schema(&self) -> Result<()> {
        for ddl in crate::schema::all_tables(&self.config.database) {
            self.inner
                .query(&ddl)
                .execute()
                .await
                .map_err(|e| Error::query(format!("DDL failed: {}", e)))?;
        }
        debug!("ClickHouse schema initialized");
        Ok(())
    }

    fn track(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard(self.in_flight.clone())
    }

    fn samples_table(&self) -> String {
        format!("{}.samples", self.config.database)
    }

    fn aggregates_table(&self) -> String {
        format!("{}.aggregates", self.config.database)
    }

    /// (table, time column, extra predicate) for a tier source.
    fn source_target(&self, source: TierSource) -> (String, &'static str, String) {
        match source {
            TierSource::Raw => (self.samples_table(), "timestamp", String::new()),
            TierSource::Aggregate(res) => (
                self.aggregates_table(),
                "bucket_start",
                format!(" AND resolution_minutes = {}", res.minutes()),
            ),
        }
    }
}

/// Server-side bucket alignment expression over `col`, as epoch millis.
fn bucket_millis_expr(bucket: Resolution, col: &str) -> String {
    let aligned = match bucket {
        Resolution::FifteenMin => format!("toStartOfInterval({col}, INTERVAL 15 MINUTE)"),
        Resolution::Hourly => format!("toStartOfInterval({col}, INTERVAL 1 HOUR)"),
        Resolution::Daily => format!("toStartOfDay({col})"),
        Resolution::Weekly => format!("toStartOfWeek({col}, 1)"),
        Resolution::Monthly => format!("toStartOfMonth({col})"),
    };
    format!("toUnixTimestamp(toDateTime({aligned}, 'UTC')) * 1000")
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl SeriesStore for ClickHouseStore {
    async fn healthy(&self) -> bool {
        let _guard = self.track();
        match self.inner.query("SELECT 1").fetch_one::<u8>().await {
            Ok(_) => {
                debug!("ClickHouse connection healthy");
                true
            }
            Err(e) => {
                error!("ClickHouse health check failed: {}", e);
                false
            }
        }
    }

    async fn probe_count(&self, source: TierSource, range: TimeRange) -> Result<u64> {
        let _guard = self.track();
        let (table, col, extra) = self.source_target(source);
        let sql = format!(
            "SELECT count() FROM {table} \
             WHERE {col} >= fromUnixTimestamp64Milli(?) \
               AND {col} < fromUnixTimestamp64Milli(?){extra}"
        );
        let count: u64 = self
            .inner
            .query(&sql)
            .bind(range.start.timestamp_millis())
            .bind(range.end.timestamp_millis())
            .fetch_one()
            .await
            .map_err(|e| Error::query(format!("probe count failed: {}", e)))?;
        Ok(count)
    }

    async fn read_bucket_stats(
        &self,
        source: TierSource,
        range: TimeRange,
        bucket: Resolution,
    ) -> Result<Vec<BucketStats>> {
        let _guard = self.track();
        let (table, col, extra) = self.source_target(source);
        let bucket_expr = bucket_millis_expr(bucket, col);
        let sql = format!(
            "SELECT signal_id, signal_kind, state_kind, \
                    {bucket_expr} AS bucket_start, \
                    argMin(value, {col}) AS first, \
                    argMax(value, {col}) AS last, \
                    sum(value) AS sum, avg(value) AS avg, \
                    min(value) AS min, max(value) AS max, \
                    count() AS count, avg(quality) AS quality_avg, \
                    any(unit) AS unit \
             FROM {table} \
             WHERE {col} >= fromUnixTimestamp64Milli(?) \
               AND {col} < fromUnixTimestamp64Milli(?){extra} \
             GROUP BY signal_id, signal_kind, state_kind, bucket_start \
             ORDER BY bucket_start, signal_id"
        );

        let rows: Vec<StatsRow> = self
            .inner
            .query(&sql)
            .bind(range.start.timestamp_millis())
            .bind(range.end.timestamp_millis())
            .fetch_all()
            .await
            .map_err(|e| Error::query(format!("grouped read failed: {}", e)))?;

        let mut stats = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(state_kind) = StateKind::parse(&row.state_kind) else {
                warn!(
                    signal_id = %row.signal_id,
                    state_kind = %row.state_kind,
                    "Skipping group with unknown state kind"
                );
                continue;
            };
            stats.push(BucketStats {
                key: GroupKey {
                    signal_id: row.signal_id,
                    signal_kind: SignalKind::parse(&row.signal_kind),
                    state_kind,
                    bucket_start: millis_to_utc(row.bucket_start),
                },
                first: row.first,
                last: row.last,
                sum: row.sum,
                avg: row.avg,
                min: row.min,
                max: row.max,
                count: row.count,
                quality_avg: row.quality_avg,
                unit: row.unit,
            });
        }
        Ok(stats)
    }

    async fn delete_exact_buckets(
        &self,
        resolution: Resolution,
        bucket_starts: &[DateTime<Utc>],
    ) -> Result<u64> {
        if bucket_starts.is_empty() {
            return Ok(0);
        }
        let _guard = self.track();
        let table = self.aggregates_table();
        let list = bucket_starts
            .iter()
            .map(|t| t.timestamp_millis().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let predicate = format!(
            "resolution_minutes = {} AND toUnixTimestamp64Milli(bucket_start) IN ({})",
            resolution.minutes(),
            list
        );

        let count: u64 = self
            .inner
            .query(&format!("SELECT count() FROM {table} WHERE {predicate}"))
            .fetch_one()
            .await
            .map_err(|e| Error::query(format!("bucket count failed: {}", e)))?;

        self.inner
            .query(&format!("ALTER TABLE {table} DELETE WHERE {predicate}"))
            .execute()
            .await
            .map_err(|e| Error::query(format!("bucket delete failed: {}", e)))?;

        Ok(count)
    }

    async fn insert_aggregates(&self, records: &[AggregateRecord]) -> Result<InsertOutcome> {
        if records.is_empty() {
            return Ok(InsertOutcome::default());
        }
        let _guard = self.track();
        let mut insert = self
            .inner
            .insert(&self.aggregates_table())
            .map_err(|e| Error::query(format!("insert open failed: {}", e)))?;
        for record in records {
            insert
                .write(&AggregateRow::from(record))
                .await
                .map_err(|e| Error::query(format!("insert write failed: {}", e)))?;
        }
        insert
            .end()
            .await
            .map_err(|e| Error::query(format!("insert commit failed: {}", e)))?;

        Ok(InsertOutcome {
            inserted: records.len() as u64,
            rejected: 0,
        })
    }

    async fn delete_where(&self, predicate: &DeletePredicate) -> Result<u64> {
        let _guard = self.track();
        let (table, col, extra) = self.source_target(predicate.target);
        let mut clause = format!(
            "{col} >= fromUnixTimestamp64Milli({}) AND {col} < fromUnixTimestamp64Milli({}){extra}",
            predicate.range.start.timestamp_millis(),
            predicate.range.end.timestamp_millis(),
        );
        if let Some(ref signal_id) = predicate.signal_id {
            // Identifiers come from our own store, but escape anyway.
            clause.push_str(&format!(" AND signal_id = '{}'", signal_id.replace('\'', "\\'")));
        }

        // Mutations are asynchronous; count up front so callers can log
        // how much data the delete covers.
        let count: u64 = self
            .inner
            .query(&format!("SELECT count() FROM {table} WHERE {clause}"))
            .fetch_one()
            .await
            .map_err(|e| Error::query(format!("delete count failed: {}", e)))?;

        self.inner
            .query(&format!("ALTER TABLE {table} DELETE WHERE {clause}"))
            .execute()
            .await
            .map_err(|e| Error::query(format!("bulk delete failed: {}", e)))?;

        debug!(predicate = %predicate, rows = count, "Bulk delete issued");
        Ok(count)
    }

    fn pool_stats(&self) -> PoolStats {
        PoolStats {
            in_use: self.in_flight.load(Ordering::Relaxed),
            max: self.config.pool_size,
        }
    }
}
