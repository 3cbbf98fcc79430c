//! Outbound events for external subsystems.
//!
//! The plausibility/alarm subsystem and other consumers subscribe to this
//! bus; the engine publishes and moves on, it never blocks on a consumer.

use crate::tier::{Tier, TimeRange};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events published by the rollup core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    /// A tier rollup finished and wrote aggregates.
    RollupCompleted {
        tier: Tier,
        window: TimeRange,
        aggregates_written: u64,
    },
    /// A deletion task exhausted its retries and was dropped.
    DeletionAbandoned {
        description: String,
        retry_count: u32,
    },
    /// The connection pool crossed into the critical band.
    PoolPressure { usage_percent: f64 },
}

/// Broadcast bus for core events. Lagging subscribers lose old events
/// rather than back-pressuring the publisher.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish without blocking; a bus with no subscribers is fine.
    pub fn publish(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
