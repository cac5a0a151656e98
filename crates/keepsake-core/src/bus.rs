use tokio::sync::broadcast;

use keepsake_types::events::CapsuleEvent;

/// Broadcast hub for capsule lifecycle events. Cheap to clone; all
/// subscribers see all events. Sending without subscribers is fine.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CapsuleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CapsuleEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: CapsuleEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
