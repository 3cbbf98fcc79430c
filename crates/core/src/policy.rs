//! Reduction policy selection and application.
//!
//! The policy is a function of (signal kind, state kind, source tier):
//!
//! - instantaneous signals average (they represent a rate, not a total)
//! - cumulative counters read from raw samples take the window delta with
//!   counter-reset detection
//! - cumulative counters read from a coarser source sum the already
//!   computed deltas (deltas compose additively across time)
//! - period-total signals pass through the last value (the source already
//!   reports a running total; summing would double count)
//! - everything else averages

use crate::signal::{BucketStats, SignalKind, StateKind};
use crate::tier::TierSource;
use serde::{Deserialize, Serialize};

/// Reset-detection thresholds per counter class.
///
/// A negative window delta is only treated as a counter reset when the
/// first value of the window already exceeded this threshold; the right
/// values depend on real sensor counter ranges, so they stay configurable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResetThresholds {
    #[serde(default = "default_energy_threshold")]
    pub energy: f64,
    #[serde(default = "default_volume_threshold")]
    pub volume: f64,
    /// Applied to counter classes without a dedicated threshold.
    #[serde(default)]
    pub other: f64,
}

fn default_energy_threshold() -> f64 {
    100.0
}

fn default_volume_threshold() -> f64 {
    10.0
}

impl Default for ResetThresholds {
    fn default() -> Self {
        Self {
            energy: default_energy_threshold(),
            volume: default_volume_threshold(),
            other: 0.0,
        }
    }
}

impl ResetThresholds {
    pub fn for_kind(&self, kind: SignalKind) -> f64 {
        match kind {
            SignalKind::Energy => self.energy,
            SignalKind::Volume => self.volume,
            _ => self.other,
        }
    }
}

/// How one bucket's grouped stats collapse into a single value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reduction {
    Average,
    /// `max(0, last - first)` with reset detection.
    CounterDelta { reset_threshold: f64 },
    /// Sum of already-computed finer-tier deltas.
    DeltaSum,
    /// Pass through the last value of the window.
    LastValue,
}

/// Select the reduction for one group.
pub fn reduction_for(
    kind: SignalKind,
    state: StateKind,
    source: TierSource,
    thresholds: &ResetThresholds,
) -> Reduction {
    if state.is_period_total() {
        return Reduction::LastValue;
    }
    if state.is_cumulative() {
        return match source {
            TierSource::Raw => Reduction::CounterDelta {
                reset_threshold: thresholds.for_kind(kind),
            },
            TierSource::Aggregate(_) => Reduction::DeltaSum,
        };
    }
    // Instantaneous and everything else.
    Reduction::Average
}

impl Reduction {
    /// Apply this reduction to one bucket's grouped stats.
    pub fn apply(&self, stats: &BucketStats) -> f64 {
        match self {
            Self::Average => stats.avg,
            Self::LastValue => stats.last,
            Self::DeltaSum => stats.sum,
            Self::CounterDelta { reset_threshold } => {
                let delta = stats.last - stats.first;
                if delta < 0.0 && stats.first > *reset_threshold {
                    // Counter rolled over or was replaced; the post-reset
                    // reading is the best delta estimate for the window.
                    stats.last
                } else {
                    delta.max(0.0)
                }
            }
        }
    }
}
