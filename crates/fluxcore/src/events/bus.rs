use super::event::ExecutionEvent;
use tokio::sync::broadcast;

/// Runtime-wide event bus; every run also publishes here.
///
/// Lagging or absent subscribers never hold up a run.
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Sender handle for publishers living outside the bus owner.
    pub fn sender(&self) -> broadcast::Sender<ExecutionEvent> {
        self.sender.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
