//! Distributors created on demand, one per actor and role.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use stallplass_core::notifications::{Category, Notification, NotificationKind, Priority};
use stallplass_realtime::{
    DistributorConfig, DistributorDeps, NotificationDistributor, OwnerNotificationDistributor,
    RenterNotificationDistributor,
};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owners,
    Renters,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationFilter {
    pub category: Option<Category>,
    pub priority: Option<Priority>,
}

pub type NotificationStream = Pin<Box<dyn Stream<Item = Value> + Send>>;

/// A running distributor of either role.
#[derive(Clone)]
pub enum ActorHandle {
    Owner(Arc<OwnerNotificationDistributor>),
    Renter(Arc<RenterNotificationDistributor>),
}

macro_rules! dispatch {
    ($handle:expr, $d:ident => $body:expr) => {
        match $handle {
            ActorHandle::Owner($d) => $body,
            ActorHandle::Renter($d) => $body,
        }
    };
}

fn filtered<D: NotificationDistributor>(
    distributor: &D,
    filter: &NotificationFilter,
) -> Vec<Notification<D::Kind>> {
    let mut notifications = match filter.category {
        Some(category) => distributor.get_notifications_by_category(category),
        None => distributor.get_notifications(),
    };
    if let Some(priority) = filter.priority {
        notifications.retain(|n| n.priority == priority);
    }
    notifications
}

fn live<K: NotificationKind>(receiver: broadcast::Receiver<Notification<K>>) -> NotificationStream {
    let stream = tokio_stream::StreamExt::filter_map(BroadcastStream::new(receiver), |item| {
        match item {
            Ok(notification) => match serde_json::to_value(&notification) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!("Failed to serialize notification {}: {}", notification.id, err);
                    None
                }
            },
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("Notification listener lagged, {} skipped", skipped);
                None
            }
        }
    });
    Box::pin(stream)
}

impl ActorHandle {
    pub fn notifications(&self, filter: &NotificationFilter) -> serde_json::Result<Value> {
        dispatch!(self, d => serde_json::to_value(filtered(d.as_ref(), filter)))
    }

    pub fn action_required(&self) -> serde_json::Result<Value> {
        dispatch!(self, d => serde_json::to_value(d.get_action_required_notifications()))
    }

    pub fn unread_count(&self) -> usize {
        dispatch!(self, d => d.get_unread_count())
    }

    pub fn mark_as_read(&self, notification_id: &str) -> bool {
        dispatch!(self, d => d.mark_as_read(notification_id))
    }

    pub fn mark_all_as_read(&self) -> usize {
        dispatch!(self, d => d.mark_all_as_read())
    }

    pub fn clear(&self) {
        dispatch!(self, d => d.clear_notifications())
    }

    pub fn subscribe(&self) -> NotificationStream {
        dispatch!(self, d => live(d.on_notification()))
    }

    async fn stop(&self) {
        dispatch!(self, d => d.stop_subscriptions().await)
    }
}

/// Owner and renter distributors keyed by user id.
pub struct DistributorRegistry {
    deps: DistributorDeps,
    config: DistributorConfig,
    owners: Mutex<HashMap<String, Arc<OwnerNotificationDistributor>>>,
    renters: Mutex<HashMap<String, Arc<RenterNotificationDistributor>>>,
}

impl DistributorRegistry {
    pub fn new(deps: DistributorDeps, config: DistributorConfig) -> Self {
        Self {
            deps,
            config,
            owners: Mutex::new(HashMap::new()),
            renters: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the owner's distributor, starting it on first use.
    pub async fn owner(&self, owner_id: &str) -> Arc<OwnerNotificationDistributor> {
        let mut owners = self.owners.lock().await;
        if let Some(existing) = owners.get(owner_id) {
            return existing.clone();
        }
        let distributor = Arc::new(OwnerNotificationDistributor::with_config(
            owner_id,
            self.deps.clone(),
            &self.config,
        ));
        let opened = distributor.start_subscriptions().await;
        info!("Started owner distributor {} ({} subscriptions)", owner_id, opened);
        owners.insert(owner_id.to_string(), distributor.clone());
        distributor
    }

    /// Returns the renter's distributor, starting it on first use.
    pub async fn renter(&self, rider_id: &str) -> Arc<RenterNotificationDistributor> {
        let mut renters = self.renters.lock().await;
        if let Some(existing) = renters.get(rider_id) {
            return existing.clone();
        }
        let distributor = Arc::new(RenterNotificationDistributor::with_config(
            rider_id,
            self.deps.clone(),
            &self.config,
        ));
        let opened = distributor.start_subscriptions().await;
        info!("Started renter distributor {} ({} subscriptions)", rider_id, opened);
        renters.insert(rider_id.to_string(), distributor.clone());
        distributor
    }

    pub async fn resolve(&self, role: Role, actor_id: &str) -> ActorHandle {
        match role {
            Role::Owners => ActorHandle::Owner(self.owner(actor_id).await),
            Role::Renters => ActorHandle::Renter(self.renter(actor_id).await),
        }
    }

    pub async fn renters(&self) -> Vec<Arc<RenterNotificationDistributor>> {
        self.renters.lock().await.values().cloned().collect()
    }

    /// Stops every distributor's subscriptions.
    pub async fn shutdown(&self) {
        let mut handles: Vec<ActorHandle> = self
            .owners
            .lock()
            .await
            .drain()
            .map(|(_, d)| ActorHandle::Owner(d))
            .collect();
        handles.extend(
            self.renters
                .lock()
                .await
                .drain()
                .map(|(_, d)| ActorHandle::Renter(d)),
        );
        for handle in handles {
            handle.stop().await;
        }
    }
}
