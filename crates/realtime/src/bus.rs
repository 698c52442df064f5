use tokio::sync::broadcast;

/// Broadcast bus that fans notifications out to any number of listeners.
///
/// Subscribing returns a receiver; dropping it unsubscribes. Listeners see
/// items in publish order.
#[derive(Clone)]
pub struct NotificationBus<T: Clone> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> NotificationBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    pub fn publish(&self, item: T) {
        // Lagging listeners are ignored to avoid blocking producers.
        let _ = self.sender.send(item);
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
