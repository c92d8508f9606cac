//! Comparison lifecycle events
//!
//! Events published by the orchestrator for external consumers (UI push,
//! audit). Delivery is fire-and-forget: a missing or lagging consumer never
//! affects a comparison run.

use schemasync_core::{ComparisonId, ComparisonScope, ComparisonStatus, SubscriptionId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle event of one comparison run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ComparisonEvent {
    /// A run acquired the subscription lock and started.
    ComparisonStarted {
        subscription_id: SubscriptionId,
        scope: ComparisonScope,
        trigger: String,
    },

    /// A run moved to a new stage.
    ComparisonProgress {
        subscription_id: SubscriptionId,
        stage: String,
        percent: u8,
    },

    /// A run finished and its result was persisted.
    ComparisonCompleted {
        subscription_id: SubscriptionId,
        comparison_id: ComparisonId,
        status: ComparisonStatus,
        total_differences: usize,
        duration_ms: u64,
    },

    /// A run failed or was cancelled.
    ComparisonFailed {
        subscription_id: SubscriptionId,
        reason: String,
    },
}

impl ComparisonEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ComparisonEvent::ComparisonStarted { .. } => "ComparisonStarted",
            ComparisonEvent::ComparisonProgress { .. } => "ComparisonProgress",
            ComparisonEvent::ComparisonCompleted { .. } => "ComparisonCompleted",
            ComparisonEvent::ComparisonFailed { .. } => "ComparisonFailed",
        }
    }

    pub fn subscription_id(&self) -> SubscriptionId {
        match self {
            ComparisonEvent::ComparisonStarted { subscription_id, .. }
            | ComparisonEvent::ComparisonProgress { subscription_id, .. }
            | ComparisonEvent::ComparisonCompleted { subscription_id, .. }
            | ComparisonEvent::ComparisonFailed { subscription_id, .. } => *subscription_id,
        }
    }
}

/// Sink for comparison lifecycle events.
pub trait ComparisonNotifier: Send + Sync {
    /// Publish an event. Must not block.
    fn notify(&self, event: ComparisonEvent);
}

/// Notifier that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl ComparisonNotifier for NoopNotifier {
    fn notify(&self, _event: ComparisonEvent) {}
}

/// Fans events out to any number of subscribers over a broadcast channel.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<ComparisonEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Receive all future events. A slow receiver lags and misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<ComparisonEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl ComparisonNotifier for BroadcastNotifier {
    fn notify(&self, event: ComparisonEvent) {
        let event_type = event.event_type();
        let subscription_id = event.subscription_id();
        match self.tx.send(event) {
            Ok(receivers) => {
                tracing::debug!(
                    event_type,
                    subscription_id = %subscription_id,
                    receivers,
                    "Broadcast comparison event"
                );
            }
            Err(_) => {
                tracing::trace!(event_type, "No receivers for comparison event");
            }
        }
    }
}
