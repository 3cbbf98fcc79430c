//! ClickHouse DDL for the two data collections.
//!
//! Both tables are partitioned by month so old data retires in whole
//! partitions when a delete covers one. The aggregate table is keyed by
//! the composite identity the uniqueness invariant is defined over.

/// Raw samples written by the ingestion path. The engine only reads and
/// deletes ranges of this table.
fn samples_table(database: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {database}.samples (
    timestamp DateTime64(3, 'UTC'),
    signal_id String,
    signal_kind LowCardinality(String),
    state_kind LowCardinality(String),
    value Float64,
    unit LowCardinality(String),
    quality UInt8
) ENGINE = MergeTree()
PARTITION BY toYYYYMM(timestamp)
ORDER BY (signal_id, timestamp)
"#
    )
}

/// Reduced buckets for all five resolutions.
fn aggregates_table(database: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {database}.aggregates (
    bucket_start DateTime64(3, 'UTC'),
    signal_id String,
    signal_kind LowCardinality(String),
    state_kind LowCardinality(String),
    resolution_minutes UInt32,
    value Float64,
    avg Float64,
    min Float64,
    max Float64,
    sample_count UInt64,
    unit LowCardinality(String),
    quality Float64
) ENGINE = MergeTree()
PARTITION BY toYYYYMM(bucket_start)
ORDER BY (resolution_minutes, signal_id, signal_kind, state_kind, bucket_start)
"#
    )
}

/// All DDL statements in creation order.
pub fn all_tables(database: &str) -> Vec<String> {
    vec![
        format!("CREATE DATABASE IF NOT EXISTS {database}"),
        samples_table(database),
        aggregates_table(database),
    ]
}
