//! Observer contract and a broadcast-backed implementation.

use tokio::sync::broadcast;

use crate::conversation::ConversationId;
use crate::error::MeshError;
use crate::peer::PeerId;

/// Sink for mesh lifecycle notifications.
///
/// Called from inside the node actor: implementations must not block.
pub trait Observer: Send + Sync + 'static {
    fn on_connect(&self, peer: &PeerId);
    fn on_disconnect(&self, peer: &PeerId);
    /// A scoped failure; `conversation` is set when one Conversation caused it.
    fn on_error(&self, _conversation: Option<ConversationId>, _error: &MeshError) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    Connected(PeerId),
    Disconnected(PeerId),
    Error {
        conversation: Option<ConversationId>,
        error: MeshError,
    },
}

/// Fans notifications out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MeshEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: MeshEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl Observer for EventBus {
    fn on_connect(&self, peer: &PeerId) {
        self.publish(MeshEvent::Connected(peer.clone()));
    }

    fn on_disconnect(&self, peer: &PeerId) {
        self.publish(MeshEvent::Disconnected(peer.clone()));
    }

    fn on_error(&self, conversation: Option<ConversationId>, error: &MeshError) {
        self.publish(MeshEvent::Error {
            conversation,
            error: error.clone(),
        });
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn on_connect(&self, _peer: &PeerId) {}
    fn on_disconnect(&self, _peer: &PeerId) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bus_delivers_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let peer = PeerId::from("p");
        bus.on_connect(&peer);
        bus.on_error(None, &MeshError::NodeStopped);
        bus.on_disconnect(&peer);

        assert_eq!(rx.recv().await.unwrap(), MeshEvent::Connected(peer.clone()));
        assert!(matches!(rx.recv().await.unwrap(), MeshEvent::Error { .. }));
        assert_eq!(rx.recv().await.unwrap(), MeshEvent::Disconnected(peer));
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        EventBus::default().on_connect(&PeerId::from("nobody-listens"));
    }
}
