//! Feed subscriptions owned by a distributor.
//!
//! Each topic gets its own pump task that feeds messages to the
//! distributor in delivery order. Pumps hold a weak reference, so a
//! dropped distributor ends them.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::{debug, info, warn};
use stallplass_core::events::{ChangeFeed, FeedMessage, SubscriptionTopic};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::distributor::NotificationDistributor;

struct OpenSubscription {
    id: String,
    topic: SubscriptionTopic,
    pump: JoinHandle<()>,
}

#[derive(Default)]
pub struct SubscriptionSet {
    open: Mutex<Vec<OpenSubscription>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OpenSubscription>> {
        self.open.lock().unwrap_or_else(|poisoned| {
            warn!("Subscription set mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Opens every topic of `distributor`. A topic that fails to open is
    /// logged and skipped; the rest still open. Calling this while
    /// subscriptions are open does nothing. Returns the number open.
    pub async fn start<D: NotificationDistributor>(
        &self,
        distributor: &Arc<D>,
        feed: &dyn ChangeFeed,
    ) -> usize {
        let already_open = self.len();
        if already_open > 0 {
            return already_open;
        }

        let mut opened = Vec::new();
        for topic in distributor.topics() {
            match feed.subscribe(topic.clone()).await {
                Ok(subscription) => {
                    let pump = tokio::spawn(pump(
                        Arc::downgrade(distributor),
                        subscription.receiver,
                        topic.clone(),
                    ));
                    opened.push(OpenSubscription {
                        id: subscription.id,
                        topic,
                        pump,
                    });
                }
                Err(e) => warn!(
                    "Could not subscribe {} to {}: {}",
                    distributor.actor_id(),
                    topic,
                    e
                ),
            }
        }

        info!(
            "Opened {} subscriptions for {}",
            opened.len(),
            distributor.actor_id()
        );
        let mut open = self.lock();
        open.extend(opened);
        open.len()
    }

    /// Closes every open subscription.
    pub async fn stop(&self, feed: &dyn ChangeFeed) {
        let open = std::mem::take(&mut *self.lock());
        for subscription in open {
            feed.unsubscribe(&subscription.id).await;
            subscription.pump.abort();
            debug!("Closed subscription to {}", subscription.topic);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn topics(&self) -> Vec<SubscriptionTopic> {
        self.lock().iter().map(|s| s.topic.clone()).collect()
    }
}

async fn pump<D: NotificationDistributor>(
    distributor: Weak<D>,
    mut receiver: mpsc::UnboundedReceiver<FeedMessage>,
    topic: SubscriptionTopic,
) {
    while let Some(message) = receiver.recv().await {
        let Some(distributor) = distributor.upgrade() else {
            break;
        };
        distributor.process(&message).await;
    }
    debug!("Subscription pump for {} finished", topic);
}
