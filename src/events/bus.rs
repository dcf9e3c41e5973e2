//! Event bus
//!
//! Thin wrapper over [`tokio::sync::broadcast`]. Publishing never blocks and
//! never fails; with no subscribers the event is dropped. Slow subscribers
//! get `RecvError::Lagged(n)` and skip the `n` oldest events.

use tokio::sync::broadcast;

use super::event::Event;

/// Fan-out channel for supervisor events
///
/// Cheap to clone; every clone publishes into the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus holding at most `capacity` undelivered events (min 1)
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: Event) {
        tracing::trace!(event = event.name(), "Publishing event");
        // Err only means there are no receivers right now
        let _ = self.tx.send(event);
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
