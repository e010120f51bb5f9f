//! Event system for real-time state notifications
//!
//! Device, capture and peer lifecycle changes are published here and
//! pushed to every signaling socket.

pub mod types;

pub use types::{SubscriberStats, SystemEvent};

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event bus for broadcasting system events
///
/// Events are fire-and-forget: with no subscribers they are dropped, and a
/// subscriber that falls too far behind gets `Lagged` and misses some.
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: SystemEvent) {
        tracing::trace!(event = event.event_name(), "Publishing event");
        let _ = self.tx.send(event);
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Convenience for publishing an isolated failure
    pub fn error(&self, module: &str, message: impl Into<String>) {
        self.publish(SystemEvent::SystemError {
            module: module.to_string(),
            severity: "error".to_string(),
            message: message.into(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(SystemEvent::PointCloudChanged {
            device_id: "D1".to_string(),
            is_active: true,
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SystemEvent::PointCloudChanged { .. }));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.error("capture", "pipeline stalled");

        assert!(matches!(rx1.recv().await.unwrap(), SystemEvent::SystemError { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), SystemEvent::SystemError { .. }));
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.error("test", "nobody listening");
    }
}
