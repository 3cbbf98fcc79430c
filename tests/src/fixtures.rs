//! Test fixtures and sample generators.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rollup_core::{AggregateRecord, Resolution, Sample, SignalKind, StateKind};

/// Shorthand for a UTC timestamp.
pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

/// One sample with full-quality defaults.
pub fn sample(
    timestamp: DateTime<Utc>,
    signal_id: &str,
    signal_kind: SignalKind,
    state_kind: StateKind,
    value: f64,
) -> Sample {
    Sample {
        timestamp,
        signal_id: signal_id.into(),
        signal_kind,
        state_kind,
        value,
        unit: "kWh".into(),
        quality: 100,
    }
}

/// A monotonically increasing energy counter sampled every 5 minutes over
/// `[start, start + hours)`, incrementing by `step` per sample.
pub fn counter_series(
    signal_id: &str,
    start: DateTime<Utc>,
    hours: i64,
    step: f64,
) -> Vec<Sample> {
    let samples_count = hours * 12;
    (0..samples_count)
        .map(|i| {
            sample(
                start + Duration::minutes(i * 5),
                signal_id,
                SignalKind::Energy,
                StateKind::CumulativeTotal,
                i as f64 * step,
            )
        })
        .collect()
}

/// An instantaneous power series sampled every 5 minutes.
pub fn power_series(signal_id: &str, start: DateTime<Utc>, hours: i64) -> Vec<Sample> {
    let samples_count = hours * 12;
    (0..samples_count)
        .map(|i| {
            sample(
                start + Duration::minutes(i * 5),
                signal_id,
                SignalKind::Power,
                StateKind::Instantaneous,
                100.0 + (i % 3) as f64 * 50.0,
            )
        })
        .collect()
}

/// One daily energy aggregate with a fixed delta value.
pub fn daily_aggregate(signal_id: &str, bucket_start: DateTime<Utc>, value: f64) -> AggregateRecord {
    AggregateRecord {
        bucket_start,
        signal_id: signal_id.into(),
        signal_kind: SignalKind::Energy,
        state_kind: StateKind::CumulativeTotal,
        resolution: Resolution::Daily,
        value,
        avg: value,
        min: value,
        max: value,
        sample_count: 96,
        unit: "kWh".into(),
        quality: 100.0,
    }
}
