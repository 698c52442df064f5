//! The contract shared by owner and renter distributors.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use stallplass_core::conversations::ConversationRepositoryTrait;
use stallplass_core::events::{decode, ChangeEvent, ChangeFeed, FeedMessage, SubscriptionTopic};
use stallplass_core::notifications::{Category, Notification, NotificationKind, Priority};
use stallplass_core::rentals::RentalRepositoryTrait;
use stallplass_core::users::UserDirectoryTrait;
use tokio::sync::broadcast;

use crate::hub::NotificationHub;
use crate::store::DEFAULT_MAX_NOTIFICATIONS;

pub const DEFAULT_ENDING_SOON_DAYS: i64 = 7;
pub const DEFAULT_BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributorConfig {
    /// Window, in days, for the rental-ending reminder.
    pub ending_soon_days: i64,
    pub bus_capacity: usize,
    pub max_notifications: usize,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            ending_soon_days: DEFAULT_ENDING_SOON_DAYS,
            bus_capacity: DEFAULT_BUS_CAPACITY,
            max_notifications: DEFAULT_MAX_NOTIFICATIONS,
        }
    }
}

/// Collaborators a distributor reads from.
#[derive(Clone)]
pub struct DistributorDeps {
    pub feed: Arc<dyn ChangeFeed>,
    pub rentals: Arc<dyn RentalRepositoryTrait>,
    pub conversations: Arc<dyn ConversationRepositoryTrait>,
    pub users: Arc<dyn UserDirectoryTrait>,
}

/// Turns change-feed events into notifications for one actor.
///
/// Implementors supply the topics they follow and the per-event rules;
/// listing, read state and listener registration are provided on top of
/// the actor's [`NotificationHub`].
#[async_trait]
pub trait NotificationDistributor: Send + Sync + 'static {
    type Kind: NotificationKind;

    /// User id of the actor this distributor serves.
    fn actor_id(&self) -> &str;

    fn hub(&self) -> &NotificationHub<Self::Kind>;

    fn topics(&self) -> Vec<SubscriptionTopic>;

    async fn handle_change(&self, event: ChangeEvent) -> stallplass_core::Result<()>;

    /// Decodes one feed message and applies it. Failures are logged and
    /// never propagate to the feed.
    async fn process(&self, message: &FeedMessage) {
        match decode(message) {
            Ok(Some(event)) => {
                if let Err(e) = self.handle_change(event).await {
                    warn!("Distributor for {} failed to handle change: {}", self.actor_id(), e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Dropping change for {}: {}", self.actor_id(), e),
        }
    }

    /// Registers a listener. Dropping the receiver unsubscribes it.
    fn on_notification(&self) -> broadcast::Receiver<Notification<Self::Kind>> {
        debug!("New notification listener for {}", self.actor_id());
        self.hub().subscribe()
    }

    fn get_notifications(&self) -> Vec<Notification<Self::Kind>> {
        self.hub().list()
    }

    fn get_notifications_by_category(&self, category: Category) -> Vec<Notification<Self::Kind>> {
        self.hub().by_category(category)
    }

    fn get_notifications_by_priority(&self, priority: Priority) -> Vec<Notification<Self::Kind>> {
        self.hub().by_priority(priority)
    }

    fn get_unread_count(&self) -> usize {
        self.hub().unread_count()
    }

    fn mark_as_read(&self, notification_id: &str) -> bool {
        self.hub().mark_as_read(notification_id)
    }

    fn mark_all_as_read(&self) -> usize {
        self.hub().mark_all_as_read()
    }

    fn clear_notifications(&self) {
        self.hub().clear()
    }

    fn get_action_required_notifications(&self) -> Vec<Notification<Self::Kind>> {
        self.hub().action_required()
    }
}
