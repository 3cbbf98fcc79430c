//! Engine configuration.
//!
//! Every knob has a serde default so a bare environment runs; the binary
//! layers `ROLLUP_*` environment variables on top via the `config` crate.

use crate::policy::ResetThresholds;
use crate::tier::{Resolution, TierSource};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection arbiter settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ArbiterSettings {
    /// Pool share reserved exclusively for HIGH (live ingestion), percent.
    #[serde(default = "default_reserved")]
    pub reserved_for_high_percent: f64,
    /// Usage percent at which the pool logs a warning state.
    #[serde(default = "default_warning")]
    pub warning_threshold: f64,
    /// Usage percent at which the pool logs a critical state.
    #[serde(default = "default_critical")]
    pub critical_threshold: f64,
    /// Effective-usage ceiling for MEDIUM (rollup) admission.
    #[serde(default = "default_ceiling")]
    pub medium_ceiling: f64,
    /// Effective-usage ceiling for LOW (deletion) admission.
    #[serde(default = "default_ceiling")]
    pub low_ceiling: f64,
    /// Pause between admission rechecks when a caller waits for capacity.
    #[serde(default = "default_recheck_secs")]
    pub recheck_secs: u64,
    /// Minimum seconds between repeated pool-state log lines.
    #[serde(default = "default_log_throttle_secs")]
    pub log_throttle_secs: u64,
}

fn default_reserved() -> f64 {
    20.0
}
fn default_warning() -> f64 {
    80.0
}
fn default_critical() -> f64 {
    95.0
}
fn default_ceiling() -> f64 {
    85.0
}
fn default_recheck_secs() -> u64 {
    5
}
fn default_log_throttle_secs() -> u64 {
    30
}

impl Default for ArbiterSettings {
    fn default() -> Self {
        Self {
            reserved_for_high_percent: default_reserved(),
            warning_threshold: default_warning(),
            critical_threshold: default_critical(),
            medium_ceiling: default_ceiling(),
            low_ceiling: default_ceiling(),
            recheck_secs: default_recheck_secs(),
            log_throttle_secs: default_log_throttle_secs(),
        }
    }
}

impl ArbiterSettings {
    pub fn recheck(&self) -> Duration {
        Duration::from_secs(self.recheck_secs)
    }

    pub fn log_throttle(&self) -> Duration {
        Duration::from_secs(self.log_throttle_secs)
    }
}

/// Cleanup safety-net horizons. Data in a source tier older than its
/// horizon is retired even if the normal post-rollup task was lost.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CleanupSettings {
    #[serde(default = "default_raw_max_age_days")]
    pub raw_max_age_days: u32,
    #[serde(default = "default_fifteen_min_max_age_days")]
    pub fifteen_min_max_age_days: u32,
    #[serde(default = "default_hourly_max_age_days")]
    pub hourly_max_age_days: u32,
}

fn default_raw_max_age_days() -> u32 {
    2
}
fn default_fifteen_min_max_age_days() -> u32 {
    35
}
fn default_hourly_max_age_days() -> u32 {
    400
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            raw_max_age_days: default_raw_max_age_days(),
            fifteen_min_max_age_days: default_fifteen_min_max_age_days(),
            hourly_max_age_days: default_hourly_max_age_days(),
        }
    }
}

impl CleanupSettings {
    /// Horizon for a source tier; daily and coarser are kept indefinitely.
    pub fn max_age(&self, source: TierSource) -> Option<ChronoDuration> {
        let days = match source {
            TierSource::Raw => self.raw_max_age_days,
            TierSource::Aggregate(Resolution::FifteenMin) => self.fifteen_min_max_age_days,
            TierSource::Aggregate(Resolution::Hourly) => self.hourly_max_age_days,
            TierSource::Aggregate(_) => return None,
        };
        Some(ChronoDuration::days(days as i64))
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupConfig {
    /// Job queue parallelism.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Steady-state probe lookback for the finest tier, minutes.
    #[serde(default = "default_steady_lookback_minutes")]
    pub steady_lookback_minutes: i64,
    /// Catch-up probe lookback after downtime, days.
    #[serde(default = "default_catchup_lookback_days")]
    pub catchup_lookback_days: i64,
    /// Catch-up chunk size for the 15-min tier, hours.
    #[serde(default = "default_chunk_hours_fine")]
    pub chunk_hours_fine: i64,
    /// Catch-up chunk size for all coarser tiers, hours.
    #[serde(default = "default_chunk_hours")]
    pub chunk_hours: i64,
    /// Whether successful rollups enqueue retirement of their source.
    #[serde(default = "default_retirement_enabled")]
    pub retirement_enabled: bool,
    /// Most recent source data kept un-retired to absorb late samples,
    /// minutes.
    #[serde(default = "default_retirement_buffer_minutes")]
    pub retirement_buffer_minutes: i64,
    /// Pacing between deletion tasks, seconds.
    #[serde(default = "default_delete_interval_secs")]
    pub delete_interval_secs: u64,
    /// Retries before a deletion task is abandoned.
    #[serde(default = "default_delete_max_retries")]
    pub delete_max_retries: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    /// Hard timeout for every store operation, seconds.
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    /// Bounded retries for probe/count queries.
    #[serde(default = "default_probe_retries")]
    pub probe_retries: u32,
    #[serde(default)]
    pub arbiter: ArbiterSettings,
    #[serde(default)]
    pub reset_thresholds: ResetThresholds,
    #[serde(default)]
    pub cleanup: CleanupSettings,
}

fn default_concurrency() -> usize {
    1
}
fn default_steady_lookback_minutes() -> i64 {
    30
}
fn default_catchup_lookback_days() -> i64 {
    7
}
fn default_chunk_hours_fine() -> i64 {
    1
}
fn default_chunk_hours() -> i64 {
    24
}
fn default_retirement_enabled() -> bool {
    true
}
fn default_retirement_buffer_minutes() -> i64 {
    60
}
fn default_delete_interval_secs() -> u64 {
    2
}
fn default_delete_max_retries() -> u32 {
    5
}
fn default_backoff_base_secs() -> u64 {
    2
}
fn default_backoff_max_secs() -> u64 {
    300
}
fn default_store_timeout_secs() -> u64 {
    30
}
fn default_probe_retries() -> u32 {
    3
}

impl Default for RollupConfig {
    fn default() -> Self {
        // serde defaults are the single source of truth.
        serde_json::from_str("{}").unwrap_or_else(|_| unreachable!())
    }
}

impl RollupConfig {
    /// Steady-state lookback for a tier: at least two bucket widths so a
    /// delayed tick still sees the previous complete bucket.
    pub fn steady_lookback(&self, resolution: Resolution) -> ChronoDuration {
        let floor = ChronoDuration::minutes(self.steady_lookback_minutes);
        let two_buckets = ChronoDuration::minutes(2 * resolution.minutes() as i64);
        floor.max(two_buckets)
    }

    pub fn catchup_lookback(&self) -> ChronoDuration {
        ChronoDuration::days(self.catchup_lookback_days)
    }

    /// Catch-up chunk width for a tier, never narrower than one bucket.
    pub fn chunk(&self, resolution: Resolution) -> ChronoDuration {
        let hours = match resolution {
            Resolution::FifteenMin => self.chunk_hours_fine,
            _ => self.chunk_hours,
        };
        ChronoDuration::hours(hours).max(ChronoDuration::minutes(resolution.minutes() as i64))
    }

    pub fn retirement_buffer(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.retirement_buffer_minutes)
    }

    pub fn delete_interval(&self) -> Duration {
        Duration::from_secs(self.delete_interval_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}
