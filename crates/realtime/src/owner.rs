//! Notifications for a stable owner.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use stallplass_core::conversations::Message;
use stallplass_core::events::{
    ChangeEvent, ChangeKind, SubscriptionTopic, BOXES_TABLE, MESSAGES_TABLE, PAYMENTS_TABLE,
    RENTALS_TABLE,
};
use stallplass_core::notifications::{
    owner_notification, NotificationDraft, OwnerEvent, OwnerNotificationType, TemplateContext,
};
use stallplass_core::payments::{Payment, PaymentStatus};
use stallplass_core::rentals::{
    detect_double_booking, Rental, RentalConflict, RentalStatus, StatusChange,
};
use stallplass_core::Result;

use crate::distributor::{DistributorConfig, DistributorDeps, NotificationDistributor};
use crate::hub::NotificationHub;
use crate::observed::ObservedStatuses;
use crate::subscriptions::SubscriptionSet;

/// Follows rentals, payments and messages that concern one owner's
/// stables, and watches for double bookings when a rental goes active.
pub struct OwnerNotificationDistributor {
    owner_id: String,
    deps: DistributorDeps,
    hub: NotificationHub<OwnerNotificationType>,
    conflicts: Mutex<Vec<RentalConflict>>,
    rental_statuses: ObservedStatuses<RentalStatus>,
    payment_statuses: ObservedStatuses<PaymentStatus>,
    subscriptions: SubscriptionSet,
}

impl OwnerNotificationDistributor {
    pub fn new(owner_id: impl Into<String>, deps: DistributorDeps) -> Self {
        Self::with_config(owner_id, deps, &DistributorConfig::default())
    }

    pub fn with_config(
        owner_id: impl Into<String>,
        deps: DistributorDeps,
        config: &DistributorConfig,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            deps,
            hub: NotificationHub::new(config.max_notifications, config.bus_capacity),
            conflicts: Mutex::new(Vec::new()),
            rental_statuses: ObservedStatuses::new(),
            payment_statuses: ObservedStatuses::new(),
            subscriptions: SubscriptionSet::new(),
        }
    }

    pub async fn start_subscriptions(self: &Arc<Self>) -> usize {
        self.subscriptions.start(self, self.deps.feed.as_ref()).await
    }

    pub async fn stop_subscriptions(&self) {
        self.subscriptions.stop(self.deps.feed.as_ref()).await
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Conflicts detected so far, oldest first. Each appears once.
    pub fn get_conflicts(&self) -> Vec<RentalConflict> {
        self.lock_conflicts().clone()
    }

    fn lock_conflicts(&self) -> MutexGuard<'_, Vec<RentalConflict>> {
        self.conflicts.lock().unwrap_or_else(|poisoned| {
            warn!("Conflict list mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn notify(&self, event_id: &str, draft: Option<NotificationDraft<OwnerNotificationType>>) {
        let Some(draft) = draft else {
            return;
        };
        if let Some(notification) = self.hub.deliver(event_id, draft, Utc::now()) {
            info!(
                "Owner {} notified: {} ({:?})",
                self.owner_id, notification.title, notification.priority
            );
        }
    }

    /// Message context for a rental of this owner, or `None` when the
    /// rental belongs to someone else.
    fn rental_context(&self, rental: &Rental) -> Result<Option<TemplateContext>> {
        let details = self.deps.rentals.get_rental_details(&rental.id)?;
        let owner_id = match &details {
            Some(details) => Some(details.owner_id.clone()),
            None => self.deps.rentals.get_stable_owner(&rental.stable_id)?,
        };
        if owner_id.as_deref() != Some(self.owner_id.as_str()) {
            return Ok(None);
        }

        let counterpart_name = match details.as_ref().and_then(|d| d.rider_name.clone()) {
            Some(name) => Some(name),
            None => self.deps.users.get_display_name(&rental.rider_id)?,
        };
        Ok(Some(TemplateContext {
            counterpart_name,
            box_name: details.as_ref().and_then(|d| d.box_name.clone()),
            stable_name: details.as_ref().and_then(|d| d.stable_name.clone()),
            amount: rental.monthly_price,
            currency: None,
            end_date: rental.end_date,
        }))
    }

    fn on_rental_changed(
        &self,
        event_id: &str,
        kind: ChangeKind,
        rental: &Rental,
        reported_previous: Option<RentalStatus>,
    ) -> Result<()> {
        if kind == ChangeKind::Delete {
            self.rental_statuses.forget(&rental.id);
            self.hub.forget_rental(&rental.id);
            return Ok(());
        }
        let Some(context) = self.rental_context(rental)? else {
            return Ok(());
        };
        let previous = self
            .rental_statuses
            .observe(&rental.id, reported_previous, rental.status);

        let to = match RentalStatus::classify_change(previous, rental.status) {
            StatusChange::Unchanged => return Ok(()),
            StatusChange::Invalid { from, to } => {
                warn!(
                    "Ignoring invalid transition {} -> {} on rental {}",
                    from, to, rental.id
                );
                return Ok(());
            }
            StatusChange::FirstSeen(status) if kind != ChangeKind::Insert => {
                debug!("First sighting of rental {} as {}, recorded", rental.id, status);
                return Ok(());
            }
            StatusChange::FirstSeen(RentalStatus::Pending) => {
                self.notify(
                    event_id,
                    owner_notification(&OwnerEvent::NewRequest {
                        rental,
                        context: &context,
                    }),
                );
                return Ok(());
            }
            StatusChange::FirstSeen(to) | StatusChange::Transition { to, .. } => to,
        };

        self.notify(
            event_id,
            owner_notification(&OwnerEvent::StatusChanged {
                rental,
                to,
                context: &context,
            }),
        );
        if to == RentalStatus::Active {
            self.scan_for_conflicts(rental, &context)?;
        }
        Ok(())
    }

    fn scan_for_conflicts(&self, activated: &Rental, context: &TemplateContext) -> Result<()> {
        let box_rentals = self.deps.rentals.list_box_rentals(&activated.box_id)?;
        let Some(conflict) = detect_double_booking(activated, &box_rentals, Utc::now()) else {
            return Ok(());
        };
        {
            let mut conflicts = self.lock_conflicts();
            if conflicts.iter().any(|c| c.id == conflict.id) {
                debug!("Conflict {} already reported", conflict.id);
                return Ok(());
            }
            conflicts.push(conflict.clone());
        }

        warn!(
            "Double booking on box {}: rentals {}",
            conflict.box_id,
            conflict.rental_ids.join(", ")
        );
        self.notify(
            &conflict.id,
            owner_notification(&OwnerEvent::ConflictDetected {
                conflict: &conflict,
                context,
            }),
        );
        Ok(())
    }

    fn payment_context(&self, payment: &Payment) -> Result<Option<TemplateContext>> {
        let details = match &payment.rental_id {
            Some(rental_id) => self.deps.rentals.get_rental_details(rental_id)?,
            None => None,
        };
        let owner_id = match (&payment.stable_id, &details) {
            (Some(stable_id), _) => self.deps.rentals.get_stable_owner(stable_id)?,
            (None, Some(details)) => Some(details.owner_id.clone()),
            (None, None) => None,
        };
        if owner_id.as_deref() != Some(self.owner_id.as_str()) {
            return Ok(None);
        }

        Ok(Some(TemplateContext {
            counterpart_name: self.deps.users.get_display_name(&payment.user_id)?,
            box_name: details.as_ref().and_then(|d| d.box_name.clone()),
            stable_name: details.as_ref().and_then(|d| d.stable_name.clone()),
            amount: Some(payment.amount),
            currency: Some(payment.currency.clone()),
            end_date: None,
        }))
    }

    fn on_payment_changed(
        &self,
        event_id: &str,
        kind: ChangeKind,
        payment: &Payment,
        reported_previous: Option<PaymentStatus>,
    ) -> Result<()> {
        if kind == ChangeKind::Delete {
            self.payment_statuses.forget(&payment.id);
            return Ok(());
        }
        let previous = self
            .payment_statuses
            .observe(&payment.id, reported_previous, payment.status);
        let completed_now = match previous {
            Some(previous) => previous != PaymentStatus::Completed,
            None => kind == ChangeKind::Insert,
        };
        if payment.status != PaymentStatus::Completed || !completed_now {
            return Ok(());
        }
        let Some(context) = self.payment_context(payment)? else {
            return Ok(());
        };
        self.notify(
            event_id,
            owner_notification(&OwnerEvent::PaymentCompleted {
                payment,
                context: &context,
            }),
        );
        Ok(())
    }

    fn on_message(&self, event_id: &str, message: &Message) -> Result<()> {
        let Some(conversation) = self
            .deps
            .conversations
            .get_conversation(&message.conversation_id)?
        else {
            debug!(
                "Message {} belongs to unknown conversation {}",
                message.id, message.conversation_id
            );
            return Ok(());
        };
        if conversation.owner_id != self.owner_id || message.sender_id == self.owner_id {
            return Ok(());
        }

        let counterpart_name = match conversation.counterpart_name(&self.owner_id) {
            Some(name) => Some(name.to_string()),
            None => self.deps.users.get_display_name(&message.sender_id)?,
        };
        let context = TemplateContext {
            counterpart_name,
            stable_name: conversation.stable_name.clone(),
            ..Default::default()
        };
        self.notify(
            event_id,
            owner_notification(&OwnerEvent::MessageReceived {
                message,
                context: &context,
            }),
        );
        Ok(())
    }
}

#[async_trait]
impl NotificationDistributor for OwnerNotificationDistributor {
    type Kind = OwnerNotificationType;

    fn actor_id(&self) -> &str {
        &self.owner_id
    }

    fn hub(&self) -> &NotificationHub<OwnerNotificationType> {
        &self.hub
    }

    fn topics(&self) -> Vec<SubscriptionTopic> {
        vec![
            SubscriptionTopic::table(RENTALS_TABLE),
            SubscriptionTopic::table(PAYMENTS_TABLE),
            SubscriptionTopic::table(MESSAGES_TABLE),
            SubscriptionTopic::table(BOXES_TABLE),
        ]
    }

    async fn handle_change(&self, event: ChangeEvent) -> Result<()> {
        match event {
            ChangeEvent::RentalChanged {
                event_id,
                kind,
                rental,
                previous_status,
            } => self.on_rental_changed(&event_id, kind, &rental, previous_status),
            ChangeEvent::PaymentChanged {
                event_id,
                kind,
                payment,
                previous_status,
            } => self.on_payment_changed(&event_id, kind, &payment, previous_status),
            ChangeEvent::MessageCreated { event_id, message } => {
                self.on_message(&event_id, &message)
            }
            ChangeEvent::BoxChanged {
                box_id, available, ..
            } => {
                debug!("Box {} changed (available: {:?})", box_id, available);
                Ok(())
            }
            ChangeEvent::Broadcast { channel, event, .. } => {
                debug!("Ignoring broadcast {} on {}", event, channel);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use stallplass_core::events::InMemoryChangeFeed;
    use stallplass_core::memory::InMemoryMarketplace;
    use stallplass_core::notifications::{Category, Priority};

    fn setup() -> (Arc<InMemoryMarketplace>, OwnerNotificationDistributor) {
        let store = Arc::new(InMemoryMarketplace::new());
        store.add_user("owner-1", "Kari");
        store.add_user("rider-1", "Ingrid");
        store.add_stable("stable-1", "owner-1", "Solbakken");
        store.add_box("box-1", "stable-1", "Box 4");
        let deps = DistributorDeps {
            feed: Arc::new(InMemoryChangeFeed::new()),
            rentals: store.clone(),
            conversations: store.clone(),
            users: store.clone(),
        };
        (store, OwnerNotificationDistributor::new("owner-1", deps))
    }

    fn rental(id: &str, status: RentalStatus) -> Rental {
        Rental {
            id: id.to_string(),
            box_id: "box-1".to_string(),
            stable_id: "stable-1".to_string(),
            rider_id: "rider-1".to_string(),
            status,
            start_date: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
            end_date: None,
            monthly_price: Some(dec!(4500)),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn changed(
        event_id: &str,
        kind: ChangeKind,
        rental: Rental,
        previous_status: Option<RentalStatus>,
    ) -> ChangeEvent {
        ChangeEvent::RentalChanged {
            event_id: event_id.to_string(),
            kind,
            rental,
            previous_status,
        }
    }

    #[tokio::test]
    async fn test_new_request_uses_names() {
        let (store, distributor) = setup();
        let pending = rental("r1", RentalStatus::Pending);
        store.insert_rental(pending.clone());

        distributor
            .handle_change(changed("e1", ChangeKind::Insert, pending, None))
            .await
            .unwrap();

        let notifications = distributor.get_notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, OwnerNotificationType::NewRentalRequest);
        assert_eq!(notifications[0].priority, Priority::High);
        assert_eq!(
            notifications[0].message,
            "You have a new rental request from Ingrid for Box 4 at Solbakken."
        );
        assert_eq!(distributor.get_action_required_notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_status_rewrite_without_change_is_silent() {
        let (store, distributor) = setup();
        let confirmed = rental("r1", RentalStatus::Confirmed);
        store.insert_rental(confirmed.clone());

        distributor
            .handle_change(changed(
                "e1",
                ChangeKind::Update,
                confirmed,
                Some(RentalStatus::Confirmed),
            ))
            .await
            .unwrap();
        assert!(distributor.get_notifications().is_empty());
    }

    #[tokio::test]
    async fn test_first_sighting_on_update_only_records_status() {
        let (store, distributor) = setup();
        let active = rental("r1", RentalStatus::Active);
        store.insert_rental(active.clone());
        store.insert_rental(rental("r2", RentalStatus::Active));

        distributor
            .handle_change(changed("e1", ChangeKind::Update, active.clone(), None))
            .await
            .unwrap();
        assert!(distributor.get_notifications().is_empty());
        assert!(distributor.get_conflicts().is_empty());

        let completed = Rental {
            status: RentalStatus::Completed,
            ..active
        };
        distributor
            .handle_change(changed("e2", ChangeKind::Update, completed, None))
            .await
            .unwrap();
        let notifications = distributor.get_notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, OwnerNotificationType::RentalCompleted);
    }

    #[tokio::test]
    async fn test_delete_releases_the_rental() {
        let (store, distributor) = setup();
        let pending = rental("r1", RentalStatus::Pending);
        store.insert_rental(pending.clone());

        let insert = changed("e1", ChangeKind::Insert, pending.clone(), None);
        distributor.handle_change(insert.clone()).await.unwrap();
        distributor.handle_change(insert.clone()).await.unwrap();
        assert_eq!(distributor.get_notifications().len(), 1);

        distributor
            .handle_change(changed("e2", ChangeKind::Delete, pending, None))
            .await
            .unwrap();
        distributor.handle_change(insert).await.unwrap();
        assert_eq!(distributor.get_notifications().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_transition_is_ignored() {
        let (store, distributor) = setup();
        let active = rental("r1", RentalStatus::Active);
        store.insert_rental(active.clone());

        distributor
            .handle_change(changed(
                "e1",
                ChangeKind::Update,
                active,
                Some(RentalStatus::Pending),
            ))
            .await
            .unwrap();
        assert!(distributor.get_notifications().is_empty());
        assert!(distributor.get_conflicts().is_empty());
    }

    #[tokio::test]
    async fn test_other_owners_rentals_are_skipped() {
        let (store, distributor) = setup();
        store.add_stable("stable-2", "owner-2", "Nordli");
        let mut foreign = rental("r9", RentalStatus::Pending);
        foreign.stable_id = "stable-2".to_string();
        store.insert_rental(foreign.clone());

        distributor
            .handle_change(changed("e1", ChangeKind::Insert, foreign, None))
            .await
            .unwrap();
        assert!(distributor.get_notifications().is_empty());
    }

    #[tokio::test]
    async fn test_second_activation_reports_one_conflict() {
        let (store, distributor) = setup();
        let first = rental("r1", RentalStatus::Active);
        let second = rental("r2", RentalStatus::Active);
        store.insert_rental(first.clone());
        store.insert_rental(second.clone());

        for (event_id, rental) in [("e1", first), ("e2", second)] {
            distributor
                .handle_change(changed(
                    event_id,
                    ChangeKind::Update,
                    rental,
                    Some(RentalStatus::Confirmed),
                ))
                .await
                .unwrap();
        }

        let conflicts = distributor.get_conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].rental_ids, vec!["r1", "r2"]);
        let urgent = distributor.get_notifications_by_priority(Priority::Urgent);
        assert_eq!(urgent.len(), 1);
        assert_eq!(urgent[0].kind, OwnerNotificationType::RentalConflict);
        assert_eq!(
            distributor
                .get_notifications_by_category(Category::Rental)
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn test_message_from_owner_is_not_notified() {
        let (store, distributor) = setup();
        store.add_conversation("c1", "rider-1", "owner-1", Some("stable-1"));
        let own = store.post_message("c1", "owner-1", "Hei").unwrap();
        let theirs = store.post_message("c1", "rider-1", "Hei igjen").unwrap();

        for (event_id, message) in [("m1", own), ("m2", theirs)] {
            distributor
                .handle_change(ChangeEvent::MessageCreated {
                    event_id: event_id.to_string(),
                    message,
                })
                .await
                .unwrap();
        }

        let notifications = distributor.get_notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, OwnerNotificationType::NewMessage);
        assert_eq!(
            notifications[0].message,
            "You have a new message from Ingrid about Solbakken."
        );
    }
}
