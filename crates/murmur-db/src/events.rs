//! Event emission.
//!
//! The worker pushes [`Event`]s after significant mutations. Subscribers
//! receive them on their own context through a `tokio` broadcast channel;
//! a slow subscriber loses the oldest events rather than stalling storage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use murmur_types::events::{Event, EventType};
use tokio::sync::broadcast;

/// Event bus for broadcasting storage events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event_type: EventType, payload: serde_json::Value) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(event = event_type.name(), "emit");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(Event {
            event_type,
            timestamp: crate::now_secs().max(0) as u64,
            payload,
        });
    }

    /// Subscribe to events. Returns a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Number of events emitted so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(
            EventType::DialogsNeedReload,
            serde_json::json!({"dialogs": [1, 2]}),
        );

        let event = rx.try_recv().expect("receive event");
        assert_eq!(event.event_type, EventType::DialogsNeedReload);
        assert_eq!(event.payload["dialogs"][1], 2);
        assert_eq!(bus.sequence(), 1);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(EventType::StorageReset, serde_json::Value::Null);
        assert_eq!(bus.sequence(), 1);
    }
}
