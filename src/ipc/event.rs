use serde::Serialize;
use tokio::sync::broadcast;

/// Broadcasts status snapshot text to every connected WebSocket client
/// (spec §6: server-push-only status feed).
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<String>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Serializes `value` and sends it to all connected clients. Errors
    /// (no subscribers, a lagging subscriber) are not the publisher's concern.
    pub fn broadcast<T: Serialize>(&self, _label: &str, value: T) {
        if let Ok(text) = serde_json::to_string(&value) {
            let _ = self.tx.send(text);
        }
    }

    /// Subscribe to all broadcast events.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}
