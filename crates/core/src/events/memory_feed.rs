//! In-process change feed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use tokio::sync::mpsc;

use super::change::{BroadcastMessage, FeedMessage, RowChange};
use super::feed::{BroadcastPublisher, ChangeFeed, FeedError, FeedSubscription, SubscriptionTopic};

struct Subscriber {
    topic: SubscriptionTopic,
    sender: mpsc::UnboundedSender<FeedMessage>,
}

#[derive(Default)]
struct FeedState {
    subscribers: HashMap<String, Subscriber>,
    broadcasts: Vec<BroadcastMessage>,
    failing_tables: HashSet<String>,
}

/// Change feed that delivers within the process.
///
/// Row changes are pushed with [`publish_row`](Self::publish_row), usually by
/// the in-memory marketplace store after a mutation. Broadcasts are kept in a
/// log for inspection.
#[derive(Default)]
pub struct InMemoryChangeFeed {
    state: Mutex<FeedState>,
}

impl InMemoryChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Change feed lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Delivers a row change to every matching table subscription.
    /// Returns the number of subscribers reached.
    pub fn publish_row(&self, change: RowChange) -> usize {
        let mut state = self.lock();
        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, subscriber) in &state.subscribers {
            let SubscriptionTopic::Table { table, filter } = &subscriber.topic else {
                continue;
            };
            if table != &change.table {
                continue;
            }
            if let Some(filter) = filter {
                if !filter.matches(&change) {
                    continue;
                }
            }
            if subscriber.sender.send(FeedMessage::Row(change.clone())).is_ok() {
                delivered += 1;
            } else {
                closed.push(id.clone());
            }
        }
        for id in closed {
            state.subscribers.remove(&id);
        }
        debug!(
            "Delivered {} change on {} to {} subscriber(s)",
            change.kind, change.table, delivered
        );
        delivered
    }

    /// Makes every later subscription to `table` fail.
    pub fn fail_subscriptions_for(&self, table: &str) {
        self.lock().failing_tables.insert(table.to_string());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Everything published through [`BroadcastPublisher`], oldest first.
    pub fn broadcasts(&self) -> Vec<BroadcastMessage> {
        self.lock().broadcasts.clone()
    }

    pub fn broadcasts_on(&self, channel: &str) -> Vec<BroadcastMessage> {
        self.lock()
            .broadcasts
            .iter()
            .filter(|b| b.channel == channel)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChangeFeed for InMemoryChangeFeed {
    async fn subscribe(&self, topic: SubscriptionTopic) -> Result<FeedSubscription, FeedError> {
        let mut state = self.lock();
        if let SubscriptionTopic::Table { table, .. } = &topic {
            if state.failing_tables.contains(table) {
                return Err(FeedError::SubscriptionFailed {
                    topic: topic.to_string(),
                    reason: "channel error".to_string(),
                });
            }
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let id = uuid::Uuid::new_v4().to_string();
        state.subscribers.insert(
            id.clone(),
            Subscriber {
                topic: topic.clone(),
                sender,
            },
        );
        debug!("Subscribed {} to {}", id, topic);
        Ok(FeedSubscription {
            id,
            topic,
            receiver,
        })
    }

    async fn unsubscribe(&self, subscription_id: &str) {
        if self.lock().subscribers.remove(subscription_id).is_some() {
            debug!("Unsubscribed {}", subscription_id);
        }
    }
}

#[async_trait]
impl BroadcastPublisher for InMemoryChangeFeed {
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<(), FeedError> {
        let message = BroadcastMessage {
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
        };
        let mut state = self.lock();
        for subscriber in state.subscribers.values() {
            if subscriber.topic == SubscriptionTopic::Channel(channel.to_string()) {
                let _ = subscriber
                    .sender
                    .send(FeedMessage::Broadcast(message.clone()));
            }
        }
        state.broadcasts.push(message);
        Ok(())
    }
}

/// Broadcaster that rejects every publish. Counts the attempts.
#[derive(Default)]
pub struct FailingBroadcaster {
    attempts: AtomicUsize,
}

impl FailingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BroadcastPublisher for FailingBroadcaster {
    async fn publish(&self, channel: &str, _event: &str, _payload: Value) -> Result<(), FeedError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(FeedError::Publish {
            channel: channel.to_string(),
            reason: "broadcast channel unavailable".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChangeKind, RowFilter};
    use chrono::Utc;
    use serde_json::json;

    fn rental_change(rider_id: &str) -> RowChange {
        RowChange {
            event_id: None,
            table: "rentals".to_string(),
            kind: ChangeKind::Insert,
            record: Some(json!({ "id": "r1", "rider_id": rider_id })),
            old_record: None,
            commit_timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_filtered_subscription_only_sees_matching_rows() {
        let feed = InMemoryChangeFeed::new();
        let mut mine = feed
            .subscribe(SubscriptionTopic::filtered(
                "rentals",
                RowFilter::eq("rider_id", "u1"),
            ))
            .await
            .unwrap();

        assert_eq!(feed.publish_row(rental_change("u2")), 0);
        assert_eq!(feed.publish_row(rental_change("u1")), 1);

        let FeedMessage::Row(change) = mine.receiver.recv().await.unwrap() else {
            panic!("expected a row change");
        };
        assert_eq!(change.record.unwrap()["rider_id"], "u1");
        assert!(mine.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_receiver() {
        let feed = InMemoryChangeFeed::new();
        let mut sub = feed.subscribe(SubscriptionTopic::table("rentals")).await.unwrap();
        feed.unsubscribe(&sub.id).await;
        assert_eq!(feed.subscriber_count(), 0);
        assert!(sub.receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_failing_table_rejects_subscription() {
        let feed = InMemoryChangeFeed::new();
        feed.fail_subscriptions_for("payments");
        assert!(feed.subscribe(SubscriptionTopic::table("payments")).await.is_err());
        assert!(feed.subscribe(SubscriptionTopic::table("rentals")).await.is_ok());
    }

    #[tokio::test]
    async fn test_broadcasts_are_logged_and_delivered() {
        let feed = InMemoryChangeFeed::new();
        let mut sub = feed
            .subscribe(SubscriptionTopic::Channel("payment-polling".to_string()))
            .await
            .unwrap();
        feed.publish("payment-polling", "payment_status_update", json!({ "n": 1 }))
            .await
            .unwrap();

        assert_eq!(feed.broadcasts_on("payment-polling").len(), 1);
        assert!(matches!(
            sub.receiver.recv().await,
            Some(FeedMessage::Broadcast(_))
        ));
    }

    #[tokio::test]
    async fn test_failing_broadcaster_counts_attempts() {
        let broadcaster = FailingBroadcaster::new();
        assert!(broadcaster.publish("c", "e", json!({})).await.is_err());
        assert_eq!(broadcaster.attempts(), 1);
    }
}
