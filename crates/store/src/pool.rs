//! Priority-aware connection-budget arbiter.
//!
//! A fixed slice of pool capacity is reserved for HIGH (live ingestion);
//! MEDIUM (rollup) and LOW (deletion) are admitted against the remaining
//! effective capacity. HIGH is only refused once the pool is actually
//! exhausted, so background thresholds can never starve live writes.

use crate::traits::SeriesStore;
use parking_lot::Mutex;
use rollup_core::config::ArbiterSettings;
use rollup_core::{CoreEvent, EventBus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Priority class of a store caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Live ingestion.
    High,
    /// Rollup jobs.
    Medium,
    /// Deletion tasks.
    Low,
}

/// Derived pool utilization; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub in_use: u32,
    pub max: u32,
    pub usage_percent: f64,
    /// Usage against the capacity left after the HIGH reservation.
    pub effective_usage_percent: f64,
    pub available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Normal,
    Warning,
    Critical,
}

struct LogState {
    state: PoolState,
    last_percent: f64,
    last_logged: Option<Instant>,
}

/// Admission control over the shared connection pool.
pub struct ConnectionArbiter {
    store: Arc<dyn SeriesStore>,
    settings: ArbiterSettings,
    events: EventBus,
    log_state: Mutex<LogState>,
}

impl ConnectionArbiter {
    pub fn new(store: Arc<dyn SeriesStore>, settings: ArbiterSettings, events: EventBus) -> Self {
        Self {
            store,
            settings,
            events,
            log_state: Mutex::new(LogState {
                state: PoolState::Normal,
                last_percent: 0.0,
                last_logged: None,
            }),
        }
    }

    /// Current raw and priority-adjusted utilization.
    pub fn snapshot(&self) -> PoolSnapshot {
        let stats = self.store.pool_stats();
        let usage_percent = if stats.max == 0 {
            100.0
        } else {
            stats.in_use as f64 / stats.max as f64 * 100.0
        };
        let effective_max =
            stats.max as f64 * (1.0 - self.settings.reserved_for_high_percent / 100.0);
        let effective_usage_percent = if effective_max <= 0.0 {
            100.0
        } else {
            stats.in_use as f64 / effective_max * 100.0
        };
        let snapshot = PoolSnapshot {
            in_use: stats.in_use,
            max: stats.max,
            usage_percent,
            effective_usage_percent,
            available: usage_percent < self.settings.critical_threshold,
        };
        self.observe(snapshot);
        snapshot
    }

    /// Admission decision for one priority class.
    pub fn admit(&self, priority: Priority) -> bool {
        let snapshot = self.snapshot();
        match priority {
            // Live ingestion is admitted while any connection is free.
            Priority::High => snapshot.in_use < snapshot.max,
            Priority::Medium => snapshot.effective_usage_percent < self.settings.medium_ceiling,
            Priority::Low => snapshot.effective_usage_percent < self.settings.low_ceiling,
        }
    }

    /// Block (polling) until `priority` is admitted or `timeout` elapses.
    /// Returns whether admission was granted.
    pub async fn wait_for_capacity(&self, priority: Priority, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.admit(priority) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let pause = self.settings.recheck().min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }

    fn classify(&self, usage_percent: f64) -> PoolState {
        if usage_percent >= self.settings.critical_threshold {
            PoolState::Critical
        } else if usage_percent >= self.settings.warning_threshold {
            PoolState::Warning
        } else {
            PoolState::Normal
        }
    }

    /// Log state transitions with throttling: only on transition or a
    /// >= 5-point usage change, and never more often than the configured
    /// minimum interval for repeats.
    fn observe(&self, snapshot: PoolSnapshot) {
        let state = self.classify(snapshot.usage_percent);
        let mut log = self.log_state.lock();
        let transition = state != log.state;
        let drifted = (snapshot.usage_percent - log.last_percent).abs() >= 5.0;
        let throttled = log
            .last_logged
            .is_some_and(|t| t.elapsed() < self.settings.log_throttle());

        if !transition && (!drifted || throttled) {
            return;
        }

        match state {
            PoolState::Normal => {
                if transition {
                    info!(
                        usage_percent = snapshot.usage_percent,
                        "Connection pool back to normal"
                    );
                }
            }
            PoolState::Warning => {
                warn!(
                    usage_percent = snapshot.usage_percent,
                    effective_usage_percent = snapshot.effective_usage_percent,
                    "Connection pool under pressure"
                );
            }
            PoolState::Critical => {
                warn!(
                    usage_percent = snapshot.usage_percent,
                    in_use = snapshot.in_use,
                    max = snapshot.max,
                    "Connection pool critical"
                );
                if transition {
                    self.events.publish(CoreEvent::PoolPressure {
                        usage_percent: snapshot.usage_percent,
                    });
                }
            }
        }

        log.state = state;
        log.last_percent = snapshot.usage_percent;
        log.last_logged = Some(Instant::now());
    }
}
