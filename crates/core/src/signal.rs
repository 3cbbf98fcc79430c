//! Signal classification and the sample / aggregate data model.

use crate::tier::Resolution;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Semantic category of a signal's source sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// Cumulative energy meter (kWh counters).
    Energy,
    /// Instantaneous power draw.
    Power,
    Temperature,
    /// Cumulative volume meter (water, gas).
    Volume,
    #[serde(other)]
    Other,
}

/// Sub-variant describing how a signal's value is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateKind {
    Instantaneous,
    /// Running counter that only increases (or resets).
    CumulativeTotal,
    /// Running counter for exported/negative flow.
    CumulativeTotalNegative,
    /// The source already reports a total for the named period.
    PeriodTotalDay,
    PeriodTotalWeek,
    PeriodTotalMonth,
    PeriodTotalYear,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Energy => "energy",
            Self::Power => "power",
            Self::Temperature => "temperature",
            Self::Volume => "volume",
            Self::Other => "other",
        }
    }

    /// Parse a stored category; anything unrecognized is `Other`.
    pub fn parse(s: &str) -> Self {
        match s {
            "energy" => Self::Energy,
            "power" => Self::Power,
            "temperature" => Self::Temperature,
            "volume" => Self::Volume,
            _ => Self::Other,
        }
    }
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instantaneous => "instantaneous",
            Self::CumulativeTotal => "cumulative-total",
            Self::CumulativeTotalNegative => "cumulative-total-negative",
            Self::PeriodTotalDay => "period-total-day",
            Self::PeriodTotalWeek => "period-total-week",
            Self::PeriodTotalMonth => "period-total-month",
            Self::PeriodTotalYear => "period-total-year",
        }
    }

    /// Parse a stored sub-variant. Unknown variants are surfaced to the
    /// caller rather than silently defaulted: reducing with the wrong
    /// policy corrupts aggregates.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "instantaneous" => Some(Self::Instantaneous),
            "cumulative-total" => Some(Self::CumulativeTotal),
            "cumulative-total-negative" => Some(Self::CumulativeTotalNegative),
            "period-total-day" => Some(Self::PeriodTotalDay),
            "period-total-week" => Some(Self::PeriodTotalWeek),
            "period-total-month" => Some(Self::PeriodTotalMonth),
            "period-total-year" => Some(Self::PeriodTotalYear),
            _ => None,
        }
    }

    /// True for counters whose window delta carries the information.
    pub fn is_cumulative(&self) -> bool {
        matches!(self, Self::CumulativeTotal | Self::CumulativeTotalNegative)
    }

    /// True for signals that report a running period total themselves.
    pub fn is_period_total(&self) -> bool {
        matches!(
            self,
            Self::PeriodTotalDay
                | Self::PeriodTotalWeek
                | Self::PeriodTotalMonth
                | Self::PeriodTotalYear
        )
    }
}

/// One raw reading from the ingestion path. Immutable once written; the
/// engine only ever reads and retires ranges of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub signal_id: String,
    pub signal_kind: SignalKind,
    pub state_kind: StateKind,
    pub value: f64,
    pub unit: String,
    /// Reading quality, 0-100.
    pub quality: u8,
}

/// Identity of one reduced bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub signal_id: String,
    pub signal_kind: SignalKind,
    pub state_kind: StateKind,
    pub bucket_start: DateTime<Utc>,
}

/// Server-side grouped statistics for one (signal, bucket) pair.
///
/// `first`/`last` are ordered by source timestamp, so any reduction policy
/// can be applied without pulling raw rows into the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub key: GroupKey,
    pub first: f64,
    pub last: f64,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub count: u64,
    pub quality_avg: f64,
    pub unit: String,
}

/// One reduced bucket as persisted in the aggregate store.
///
/// At most one record exists per (signal_id, signal_kind, state_kind,
/// resolution, bucket_start); re-running a rollup replaces, never
/// duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub bucket_start: DateTime<Utc>,
    pub signal_id: String,
    pub signal_kind: SignalKind,
    pub state_kind: StateKind,
    pub resolution: Resolution,
    /// The policy-selected reduction.
    pub value: f64,
    // avg/min/max always kept for diagnostics regardless of policy.
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub sample_count: u64,
    pub unit: String,
    /// Mean quality of the reduced inputs, 0-100.
    pub quality: f64,
}

impl AggregateRecord {
    pub fn key(&self) -> GroupKey {
        GroupKey {
            signal_id: self.signal_id.clone(),
            signal_kind: self.signal_kind,
            state_kind: self.state_kind,
            bucket_start: self.bucket_start,
        }
    }
}
