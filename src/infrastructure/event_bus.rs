use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tracing::warn;

use crate::domain::events::SignalEvent;

/// Queue depth per subscriber. A subscriber that falls this far behind
/// starts losing events rather than stalling the publisher.
const SUBSCRIBER_QUEUE_DEPTH: usize = 1024;

/// Broadcast bus for signal lifecycle events.
///
/// Each subscriber owns a bounded FIFO queue; publishing never blocks and
/// never waits on a slow consumer. Delivery order per subscriber matches
/// publish order. Disconnected subscribers are pruned on the next publish.
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Sender<SignalEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a subscriber and return its event queue.
    pub async fn subscribe(&self) -> Receiver<SignalEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        self.subscribers.write().await.push(tx);
        rx
    }

    /// Publish an event to all live subscribers without blocking.
    pub async fn publish(&self, event: SignalEvent) {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.is_empty() {
            return;
        }

        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                warn!(
                    "EventBus: subscriber queue full, dropping {} event",
                    dropped.kind()
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}
