//! Tier scheduler: wall-clock timers feeding a priority job queue.
//!
//! Each tier has a fixed fire schedule. Fired (or manually triggered)
//! tiers enter a priority queue drained by a dispatcher under a global
//! concurrency cap, finer tiers first so coarser ones read fresh input.
//! A tier can be queued or running at most once at a time.

use chrono::Utc;
use rollup_core::error::JobErrorCode;
use rollup_core::{Error, Result, RollupConfig, Tier};
use serde::{Deserialize, Serialize};
use series_store::{ConnectionArbiter, Priority};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use telemetry::metrics;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{RollupEngine, SkipReason, TierRunResult};

/// Scheduler-side view of one tier, served by the ops API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierStatus {
    pub tier: Tier,
    pub next_fire: chrono::DateTime<Utc>,
    pub queued: bool,
    pub running: bool,
    pub last_run: Option<chrono::DateTime<Utc>>,
    pub last_result: Option<TierRunResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Job {
    tier: Tier,
    seq: u64,
}

// Max-heap: lower tier priority rank wins, then FIFO by sequence.
impl Ord for Job {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .tier
            .priority()
            .cmp(&self.tier.priority())
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    engine: Arc<RollupEngine>,
    arbiter: Arc<ConnectionArbiter>,
    config: Arc<RollupConfig>,
    queue: parking_lot::Mutex<QueueState>,
    notify: Notify,
    permits: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

struct QueueState {
    heap: BinaryHeap<Job>,
    queued: HashSet<Tier>,
    running: HashSet<Tier>,
    last_runs: HashMap<Tier, chrono::DateTime<Utc>>,
    last_results: HashMap<Tier, TierRunResult>,
    next_seq: u64,
}

/// Owns a tier's running flag. Clearing happens in `Drop`, so a
/// cancelled or panicked job can never leave its tier wedged as busy.
struct RunGuard {
    inner: Arc<Inner>,
    tier: Tier,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.queue.lock().running.remove(&self.tier);
    }
}

/// Cloneable handle to the scheduler.
#[derive(Clone)]
pub struct RollupScheduler {
    inner: Arc<Inner>,
}

impl RollupScheduler {
    pub fn new(
        engine: Arc<RollupEngine>,
        arbiter: Arc<ConnectionArbiter>,
        config: Arc<RollupConfig>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            inner: Arc::new(Inner {
                engine,
                arbiter,
                config,
                queue: parking_lot::Mutex::new(QueueState {
                    heap: BinaryHeap::new(),
                    queued: HashSet::new(),
                    running: HashSet::new(),
                    last_runs: HashMap::new(),
                    last_results: HashMap::new(),
                    next_seq: 0,
                }),
                notify: Notify::new(),
                permits,
                shutdown,
            }),
        }
    }

    /// Start the per-tier timers and the dispatcher.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(Tier::ALL.len() + 1);
        for tier in Tier::ALL {
            let scheduler = self.clone();
            handles.push(tokio::spawn(async move {
                scheduler.timer_loop(tier).await;
            }));
        }
        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.dispatch_loop().await;
        }));
        handles
    }

    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
        self.inner.notify.notify_waiters();
    }

    /// Enqueue a tier run for the dispatcher. Fails if the tier is
    /// already queued or running.
    pub fn trigger(&self, tier: Tier) -> Result<()> {
        if self.submit(tier) {
            info!(tier = %tier, "Trigger accepted");
            Ok(())
        } else {
            Err(Error::job(
                JobErrorCode::TierBusy,
                format!("tier {} already queued or running", tier),
            ))
        }
    }

    /// Run a tier immediately through the same code path a scheduled job
    /// takes, returning its structured result. Fails with `JOB_001` if
    /// the tier is already queued or running.
    pub async fn run_now(&self, tier: Tier) -> Result<TierRunResult> {
        let Some(_guard) = self.mark_running(tier) else {
            return Err(Error::job(
                JobErrorCode::TierBusy,
                format!("tier {} already queued or running", tier),
            ));
        };
        info!(tier = %tier, "Manual run started");

        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::internal("scheduler semaphore closed"))?;
        let result = self.run_job(tier).await;
        drop(permit);
        self.finish(tier, result.clone());
        Ok(result)
    }

    /// Current view of every tier, ordered by priority.
    pub fn status(&self) -> Vec<TierStatus> {
        let now = Utc::now();
        let state = self.inner.queue.lock();
        Tier::ALL
            .iter()
            .map(|&tier| TierStatus {
                tier,
                next_fire: tier.next_fire(now),
                queued: state.queued.contains(&tier),
                running: state.running.contains(&tier),
                last_run: state.last_runs.get(&tier).copied(),
                last_result: state.last_results.get(&tier).cloned(),
            })
            .collect()
    }

    /// Enqueue unless already queued or running. Returns false when the
    /// submission was dropped as a duplicate.
    fn submit(&self, tier: Tier) -> bool {
        {
            let mut state = self.inner.queue.lock();
            if state.queued.contains(&tier) || state.running.contains(&tier) {
                return false;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queued.insert(tier);
            state.heap.push(Job { tier, seq });
        }
        self.inner.notify.notify_one();
        true
    }

    async fn timer_loop(&self, tier: Tier) {
        let mut shutdown = self.inner.shutdown.subscribe();
        loop {
            let now = Utc::now();
            let fire_at = tier.next_fire(now);
            let sleep_for = (fire_at - now)
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    if !self.submit(tier) {
                        debug!(tier = %tier, "Tick skipped, tier already in flight");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn dispatch_loop(&self) {
        let mut shutdown = self.inner.shutdown.subscribe();
        loop {
            let (job, guard) = loop {
                if let Some(popped) = self.pop_job() {
                    break popped;
                }
                tokio::select! {
                    _ = self.inner.notify.notified() => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            };

            // Cap parallelism before spending a pool connection.
            let permit = match self.inner.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let scheduler = self.clone();
            tokio::spawn(async move {
                let result = scheduler.run_job(job.tier).await;
                scheduler.finish(job.tier, result);
                drop(guard);
                drop(permit);
            });
        }
    }

    /// Mark a tier running for a manual invocation; `None` when it is
    /// already queued or running.
    fn mark_running(&self, tier: Tier) -> Option<RunGuard> {
        let mut state = self.inner.queue.lock();
        if state.queued.contains(&tier) || state.running.contains(&tier) {
            return None;
        }
        state.running.insert(tier);
        Some(RunGuard {
            inner: self.inner.clone(),
            tier,
        })
    }

    fn pop_job(&self) -> Option<(Job, RunGuard)> {
        let mut state = self.inner.queue.lock();
        let job = state.heap.pop()?;
        state.queued.remove(&job.tier);
        state.running.insert(job.tier);
        Some((
            job,
            RunGuard {
                inner: self.inner.clone(),
                tier: job.tier,
            },
        ))
    }

    /// Record the outcome for the status view. The running flag is owned
    /// by the job's [`RunGuard`], not cleared here.
    fn finish(&self, tier: Tier, result: TierRunResult) {
        let mut state = self.inner.queue.lock();
        state.last_runs.insert(tier, Utc::now());
        state.last_results.insert(tier, result);
    }

    async fn run_job(&self, tier: Tier) -> TierRunResult {
        // Rollups run at MEDIUM: live ingestion always outranks them. At
        // critical usage the cycle is skipped outright; below critical the
        // job waits one recheck interval and tries once more.
        if !self.inner.arbiter.admit(Priority::Medium) {
            let snapshot = self.inner.arbiter.snapshot();
            if snapshot.usage_percent < self.inner.config.arbiter.critical_threshold {
                tokio::time::sleep(self.inner.config.arbiter.recheck()).await;
            }
            if !self.inner.arbiter.admit(Priority::Medium) {
                metrics().arbiter_denials.inc();
                warn!(tier = %tier, "Pool arbiter refused rollup admission, deferring to next tick");
                return TierRunResult::skipped(tier, SkipReason::ArbiterDenied);
            }
        }

        let now = Utc::now();
        match tier.resolution() {
            Some(resolution) => self.inner.engine.rollup_tier(resolution, now).await,
            None => self.inner.engine.run_cleanup(now).await,
        }
    }
}
