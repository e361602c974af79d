//! Broadcast hub for distributing [`SessionEvent`]s to observer connections.
//!
//! Built on `tokio::sync::broadcast`. Delivery is best-effort: publishing
//! with no subscribers is a no-op, and a slow subscriber lags and drops
//! events without ever blocking session processing.

use tokio::sync::broadcast;
use voxrelay_types::event::SessionEvent;

/// Multi-consumer fan-out of session lifecycle and content events.
///
/// Cloning the hub clones the sender, allowing multiple producers and
/// consumers.
pub struct BroadcastHub {
    sender: broadcast::Sender<SessionEvent>,
}

impl BroadcastHub {
    /// Create a new hub with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no subscribers, the event is silently dropped.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for BroadcastHub {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("observer_count", &self.sender.receiver_count())
            .finish()
    }
}
