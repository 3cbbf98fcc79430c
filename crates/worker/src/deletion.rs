//! Background deletion queue.
//!
//! A single consumer drains retirement tasks at a bounded pace so bulk
//! deletes never land back-to-back on the shared store, and defers when
//! the arbiter reports pressure. Retirement is advisory cleanup: a task
//! that exhausts its retries is abandoned with a log, aggregates stay
//! correct either way.

use rollup_core::{backoff::backoff_delay, CoreEvent, EventBus, RollupConfig};
use series_store::{ConnectionArbiter, DeletePredicate, Priority, SeriesStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use telemetry::metrics;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle of one deletion task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Attempting,
    Done,
    Abandoned,
}

/// One bulk-delete unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionTask {
    pub predicate: DeletePredicate,
    pub description: String,
    pub retry_count: u32,
    pub state: TaskState,
}

/// Queue depth and lifetime processing counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeletionStats {
    pub queue_depth: usize,
    pub processed: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub rows_deleted: u64,
}

struct Inner {
    store: Arc<dyn SeriesStore>,
    arbiter: Arc<ConnectionArbiter>,
    events: EventBus,
    config: Arc<RollupConfig>,
    queue: Mutex<VecDeque<DeletionTask>>,
    processed: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
    rows_deleted: AtomicU64,
    shutdown: watch::Sender<bool>,
}

/// Cloneable handle to the deletion queue.
#[derive(Clone)]
pub struct DeletionQueue {
    inner: Arc<Inner>,
}

impl DeletionQueue {
    pub fn new(
        store: Arc<dyn SeriesStore>,
        arbiter: Arc<ConnectionArbiter>,
        events: EventBus,
        config: Arc<RollupConfig>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                store,
                arbiter,
                events,
                config,
                queue: Mutex::new(VecDeque::new()),
                processed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                abandoned: AtomicU64::new(0),
                rows_deleted: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    /// Add a retirement task to the back of the queue.
    pub fn enqueue(&self, predicate: DeletePredicate, description: impl Into<String>) {
        let task = DeletionTask {
            predicate,
            description: description.into(),
            retry_count: 0,
            state: TaskState::Queued,
        };
        debug!(task = %task.predicate, "Queued deletion task");
        self.push_back(task);
    }

    /// Current depth and lifetime counters.
    pub fn stats(&self) -> DeletionStats {
        DeletionStats {
            queue_depth: self.inner.queue.lock().len(),
            processed: self.inner.processed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            abandoned: self.inner.abandoned.load(Ordering::Relaxed),
            rows_deleted: self.inner.rows_deleted.load(Ordering::Relaxed),
        }
    }

    /// Snapshot of queued tasks, oldest first. Lets tests assert a
    /// retirement predicate without executing it.
    pub fn pending(&self) -> Vec<DeletionTask> {
        self.inner.queue.lock().iter().cloned().collect()
    }

    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
    }

    /// Start the single consumer loop.
    pub fn spawn(&self) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move { queue.run().await })
    }

    async fn run(&self) {
        let mut shutdown = self.inner.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.inner.config.delete_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Deletion queue started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            self.drain_one().await;
        }
        info!("Deletion queue stopped");
    }

    /// Process at most one task; deferred tasks stay at the queue head.
    async fn drain_one(&self) {
        let Some(mut task) = self.pop_front() else {
            return;
        };

        if !self.inner.arbiter.admit(Priority::Low) {
            metrics().arbiter_denials.inc();
            debug!(task = %task.predicate, "Deletion deferred, pool under pressure");
            self.push_front(task);
            return;
        }

        task.state = TaskState::Attempting;
        let result = tokio::time::timeout(
            self.inner.config.store_timeout(),
            self.inner.store.delete_where(&task.predicate),
        )
        .await;

        match result {
            Ok(Ok(rows)) => {
                task.state = TaskState::Done;
                self.inner.processed.fetch_add(1, Ordering::Relaxed);
                self.inner.rows_deleted.fetch_add(rows, Ordering::Relaxed);
                metrics().deletions_processed.inc();
                metrics().rows_deleted.inc_by(rows);
                info!(
                    task = %task.description,
                    predicate = %task.predicate,
                    rows,
                    "Deletion task complete"
                );
            }
            Ok(Err(e)) => self.handle_failure(task, e.to_string()),
            Err(_) => self.handle_failure(task, "store operation timed out".to_string()),
        }
    }

    fn handle_failure(&self, mut task: DeletionTask, error: String) {
        self.inner.failed.fetch_add(1, Ordering::Relaxed);
        metrics().deletions_failed.inc();
        task.retry_count += 1;

        if task.retry_count > self.inner.config.delete_max_retries {
            task.state = TaskState::Abandoned;
            self.inner.abandoned.fetch_add(1, Ordering::Relaxed);
            metrics().deletions_abandoned.inc();
            error!(
                task = %task.description,
                predicate = %task.predicate,
                retries = task.retry_count - 1,
                error = %error,
                "Deletion task abandoned; retirement delayed, aggregates unaffected"
            );
            self.inner.events.publish(CoreEvent::DeletionAbandoned {
                description: task.description,
                retry_count: task.retry_count - 1,
            });
            return;
        }

        let delay = backoff_delay(
            task.retry_count - 1,
            self.inner.config.backoff_base(),
            self.inner.config.backoff_max(),
        );
        warn!(
            task = %task.description,
            retry = task.retry_count,
            delay_secs = delay.as_secs(),
            error = %error,
            "Deletion task failed, re-queueing with backoff"
        );

        task.state = TaskState::Queued;
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.push_back(task);
        });
    }

    fn pop_front(&self) -> Option<DeletionTask> {
        let task = self.inner.queue.lock().pop_front();
        self.sync_depth();
        task
    }

    fn push_front(&self, task: DeletionTask) {
        self.inner.queue.lock().push_front(task);
        self.sync_depth();
    }

    fn push_back(&self, task: DeletionTask) {
        self.inner.queue.lock().push_back(task);
        self.sync_depth();
    }

    fn sync_depth(&self) {
        metrics()
            .deletion_queue_depth
            .set(self.inner.queue.lock().len() as u64);
    }
}
