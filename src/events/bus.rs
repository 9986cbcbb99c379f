//! Broadcast bus for engine events

use super::{EngineEvent, EventEmitter};
use tokio::sync::broadcast;
use tracing::trace;

/// Default broadcast channel capacity
const DEFAULT_CAPACITY: usize = 1024;

/// Distributes `EngineEvent`s via `tokio::sync::broadcast`.
///
/// With no subscribers connected, events are dropped. Slow subscribers lag
/// and lose the oldest events rather than blocking the engine.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventEmitter for EventBus {
    fn emit(&self, event: EngineEvent) {
        let label = event.label();
        if let Ok(n) = self.sender.send(event) {
            trace!(event = label, subscribers = n, "Engine event emitted");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
