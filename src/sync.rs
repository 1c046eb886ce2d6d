use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub const STATE_UPDATED: &str = "state-updated";
const BUS_CAPACITY: usize = 64;

/// Notification that some surface wrote the state document. Receivers never
/// trust a payload; they re-read the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub origin: Uuid,
}

impl SyncMessage {
    pub fn state_updated(origin: Uuid) -> Self {
        Self {
            kind: STATE_UPDATED.to_string(),
            origin,
        }
    }

    pub fn is_state_update(&self) -> bool {
        self.kind == STATE_UPDATED
    }
}

/// Fire-and-forget broadcast shared by every surface of one profile.
#[derive(Debug, Clone)]
pub struct SyncBus {
    sender: broadcast::Sender<SyncMessage>,
}

impl Default for SyncBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Returns the number of listeners reached; zero is not an error.
    pub fn publish(&self, message: SyncMessage) -> usize {
        match self.sender.send(message) {
            Ok(count) => count,
            Err(_) => {
                tracing::debug!("state update broadcast had no listeners");
                0
            }
        }
    }

    pub fn subscribe(&self, surface: Uuid) -> SyncListener {
        SyncListener {
            surface,
            receiver: self.sender.subscribe(),
        }
    }
}

/// One surface's view of the bus; skips messages the surface sent itself.
pub struct SyncListener {
    surface: Uuid,
    receiver: broadcast::Receiver<SyncMessage>,
}

impl SyncListener {
    /// Waits for the next update from another surface. Lagging collapses into
    /// a single update since every update means "reload". Returns `None` once
    /// the bus is gone.
    pub async fn next_update(&mut self) -> Option<SyncMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if message.origin == self.surface || !message.is_state_update() => continue,
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "sync listener lagged; reloading once");
                    return Some(SyncMessage::state_updated(Uuid::nil()));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listeners_skip_their_own_messages() {
        let bus = SyncBus::new();
        let dashboard = Uuid::new_v4();
        let popup = Uuid::new_v4();
        let mut listener = bus.subscribe(dashboard);

        bus.publish(SyncMessage::state_updated(dashboard));
        bus.publish(SyncMessage::state_updated(popup));

        let message = listener.next_update().await.expect("update");
        assert_eq!(message.origin, popup);
    }

    #[test]
    fn publish_without_listeners_is_silent() {
        let bus = SyncBus::new();
        assert_eq!(bus.publish(SyncMessage::state_updated(Uuid::new_v4())), 0);
    }

    #[test]
    fn message_serializes_with_type_field() {
        let message = SyncMessage::state_updated(Uuid::nil());
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["type"], "state-updated");
    }

    #[tokio::test]
    async fn closed_bus_ends_listener() {
        let bus = SyncBus::new();
        let mut listener = bus.subscribe(Uuid::new_v4());
        drop(bus);
        assert!(listener.next_update().await.is_none());
    }
}
