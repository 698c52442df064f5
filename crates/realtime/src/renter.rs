//! Notifications for a renter (rider).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use log::{debug, info, warn};
use stallplass_core::events::{
    ChangeEvent, ChangeKind, RowFilter, SubscriptionTopic, PAYMENTS_TABLE, RENTALS_TABLE,
};
use stallplass_core::notifications::{
    renter_notification, NotificationDraft, RenterEvent, RenterNotificationType, TemplateContext,
};
use stallplass_core::payments::{Payment, PaymentStatus};
use stallplass_core::rentals::{Rental, RentalStatus, StatusChange};
use stallplass_core::Result;

use crate::distributor::{DistributorConfig, DistributorDeps, NotificationDistributor};
use crate::hub::NotificationHub;
use crate::observed::ObservedStatuses;
use crate::subscriptions::SubscriptionSet;

/// Follows one rider's rentals and payments.
pub struct RenterNotificationDistributor {
    rider_id: String,
    deps: DistributorDeps,
    ending_soon_days: i64,
    hub: NotificationHub<RenterNotificationType>,
    rental_statuses: ObservedStatuses<RentalStatus>,
    payment_statuses: ObservedStatuses<PaymentStatus>,
    subscriptions: SubscriptionSet,
}

impl RenterNotificationDistributor {
    pub fn new(rider_id: impl Into<String>, deps: DistributorDeps) -> Self {
        Self::with_config(rider_id, deps, &DistributorConfig::default())
    }

    pub fn with_config(
        rider_id: impl Into<String>,
        deps: DistributorDeps,
        config: &DistributorConfig,
    ) -> Self {
        Self {
            rider_id: rider_id.into(),
            deps,
            ending_soon_days: config.ending_soon_days,
            hub: NotificationHub::new(config.max_notifications, config.bus_capacity),
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

    /// Reminds the rider of active rentals ending within the configured
    /// window of `today`. Each rental and end date is reminded once.
    /// Returns how many reminders were delivered.
    pub fn check_ending_soon(&self, today: NaiveDate) -> Result<usize> {
        let horizon = today + Duration::days(self.ending_soon_days);
        let active = self
            .deps
            .rentals
            .list_rider_rentals(&self.rider_id, Some(RentalStatus::Active))?;

        let mut delivered = 0;
        for rental in active {
            let Some(end_date) = rental.end_date else {
                continue;
            };
            if end_date < today || end_date > horizon {
                continue;
            }
            let context = self.rental_context(&rental)?;
            let event_id = format!("ending-soon:{}:{}", rental.id, end_date);
            if self.notify(
                &event_id,
                renter_notification(&RenterEvent::EndingSoon {
                    rental: &rental,
                    context: &context,
                }),
            ) {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    fn notify(
        &self,
        event_id: &str,
        draft: Option<NotificationDraft<RenterNotificationType>>,
    ) -> bool {
        let Some(draft) = draft else {
            return false;
        };
        match self.hub.deliver(event_id, draft, Utc::now()) {
            Some(notification) => {
                info!("Rider {} notified: {}", self.rider_id, notification.title);
                true
            }
            None => false,
        }
    }

    fn owner_name(&self, stable_id: &str) -> Result<Option<String>> {
        match self.deps.rentals.get_stable_owner(stable_id)? {
            Some(owner_id) => self.deps.users.get_display_name(&owner_id),
            None => Ok(None),
        }
    }

    fn rental_context(&self, rental: &Rental) -> Result<TemplateContext> {
        let details = self.deps.rentals.get_rental_details(&rental.id)?;
        let counterpart_name = match details.as_ref().and_then(|d| d.owner_name.clone()) {
            Some(name) => Some(name),
            None => self.owner_name(&rental.stable_id)?,
        };
        Ok(TemplateContext {
            counterpart_name,
            box_name: details.as_ref().and_then(|d| d.box_name.clone()),
            stable_name: details.as_ref().and_then(|d| d.stable_name.clone()),
            amount: rental.monthly_price,
            currency: None,
            end_date: rental.end_date,
        })
    }

    fn payment_context(&self, payment: &Payment) -> Result<TemplateContext> {
        let details = match &payment.rental_id {
            Some(rental_id) => self.deps.rentals.get_rental_details(rental_id)?,
            None => None,
        };
        Ok(TemplateContext {
            counterpart_name: details.as_ref().and_then(|d| d.owner_name.clone()),
            box_name: details.as_ref().and_then(|d| d.box_name.clone()),
            stable_name: details.as_ref().and_then(|d| d.stable_name.clone()),
            amount: Some(payment.amount),
            currency: Some(payment.currency.clone()),
            end_date: None,
        })
    }

    fn on_rental_changed(
        &self,
        event_id: &str,
        kind: ChangeKind,
        rental: &Rental,
        reported_previous: Option<RentalStatus>,
    ) -> Result<()> {
        if rental.rider_id != self.rider_id {
            return Ok(());
        }
        if kind == ChangeKind::Delete {
            self.rental_statuses.forget(&rental.id);
            self.hub.forget_rental(&rental.id);
            return Ok(());
        }
        let previous = self
            .rental_statuses
            .observe(&rental.id, reported_previous, rental.status);

        let event = match RentalStatus::classify_change(previous, rental.status) {
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
            StatusChange::FirstSeen(RentalStatus::Pending) => None,
            StatusChange::FirstSeen(to) | StatusChange::Transition { to, .. } => Some(to),
        };

        let context = self.rental_context(rental)?;
        let draft = match event {
            None => renter_notification(&RenterEvent::RequestSent {
                rental,
                context: &context,
            }),
            Some(to) => renter_notification(&RenterEvent::StatusChanged {
                rental,
                to,
                context: &context,
            }),
        };
        self.notify(event_id, draft);
        Ok(())
    }

    fn on_payment_changed(
        &self,
        event_id: &str,
        kind: ChangeKind,
        payment: &Payment,
        reported_previous: Option<PaymentStatus>,
    ) -> Result<()> {
        if payment.user_id != self.rider_id {
            return Ok(());
        }
        if kind == ChangeKind::Delete {
            self.payment_statuses.forget(&payment.id);
            return Ok(());
        }
        let previous = self
            .payment_statuses
            .observe(&payment.id, reported_previous, payment.status);

        let due = kind == ChangeKind::Insert && payment.status == PaymentStatus::Pending;
        let confirmed = payment.status == PaymentStatus::Completed
            && match previous {
                Some(previous) => previous != PaymentStatus::Completed,
                None => kind == ChangeKind::Insert,
            };
        if !due && !confirmed {
            return Ok(());
        }

        let context = self.payment_context(payment)?;
        let draft = if due {
            renter_notification(&RenterEvent::PaymentDue {
                payment,
                context: &context,
            })
        } else {
            renter_notification(&RenterEvent::PaymentConfirmed {
                payment,
                context: &context,
            })
        };
        self.notify(event_id, draft);
        Ok(())
    }
}

#[async_trait]
impl NotificationDistributor for RenterNotificationDistributor {
    type Kind = RenterNotificationType;

    fn actor_id(&self) -> &str {
        &self.rider_id
    }

    fn hub(&self) -> &NotificationHub<RenterNotificationType> {
        &self.hub
    }

    fn topics(&self) -> Vec<SubscriptionTopic> {
        vec![
            SubscriptionTopic::filtered(
                RENTALS_TABLE,
                RowFilter::eq("rider_id", self.rider_id.as_str()),
            ),
            SubscriptionTopic::filtered(
                PAYMENTS_TABLE,
                RowFilter::eq("user_id", self.rider_id.as_str()),
            ),
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
            other => {
                debug!(
                    "Rider {} ignoring change {:?}",
                    self.rider_id,
                    other.event_id()
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use stallplass_core::events::InMemoryChangeFeed;
    use stallplass_core::memory::InMemoryMarketplace;
    use stallplass_core::notifications::Priority;

    fn setup() -> (Arc<InMemoryMarketplace>, RenterNotificationDistributor) {
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
        (store, RenterNotificationDistributor::new("rider-1", deps))
    }

    fn rental(id: &str, status: RentalStatus, end_date: Option<NaiveDate>) -> Rental {
        Rental {
            id: id.to_string(),
            box_id: "box-1".to_string(),
            stable_id: "stable-1".to_string(),
            rider_id: "rider-1".to_string(),
            status,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date,
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
    async fn test_cancellation_reads_as_rejection() {
        let (store, distributor) = setup();
        let cancelled = rental("r1", RentalStatus::Cancelled, None);
        store.insert_rental(cancelled.clone());

        distributor
            .handle_change(changed(
                "e1",
                ChangeKind::Update,
                cancelled,
                Some(RentalStatus::Pending),
            ))
            .await
            .unwrap();

        let notifications = distributor.get_notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, RenterNotificationType::RequestRejected);
    }

    #[tokio::test]
    async fn test_confirmation_names_the_owner() {
        let (store, distributor) = setup();
        let confirmed = rental("r1", RentalStatus::Confirmed, None);
        store.insert_rental(confirmed.clone());

        distributor
            .handle_change(changed(
                "e1",
                ChangeKind::Update,
                confirmed,
                Some(RentalStatus::Pending),
            ))
            .await
            .unwrap();

        let notifications = distributor.get_notifications();
        assert_eq!(notifications[0].kind, RenterNotificationType::RentalConfirmed);
        assert_eq!(notifications[0].priority, Priority::High);
        assert_eq!(
            notifications[0].message,
            "Your rental of Box 4 at Solbakken has been confirmed by Kari."
        );
    }

    #[tokio::test]
    async fn test_first_sightings_on_update_are_silent() {
        let (store, distributor) = setup();
        let active = rental("r1", RentalStatus::Active, None);
        store.insert_rental(active.clone());
        let mut payment =
            Payment::new_pending("p1", "rider-1", "order-1", dec!(4500), "NOK", Utc::now());
        payment.status = PaymentStatus::Completed;

        distributor
            .handle_change(changed("e1", ChangeKind::Update, active, None))
            .await
            .unwrap();
        distributor
            .handle_change(ChangeEvent::PaymentChanged {
                event_id: "e2".to_string(),
                kind: ChangeKind::Update,
                payment,
                previous_status: None,
            })
            .await
            .unwrap();
        assert!(distributor.get_notifications().is_empty());

        let completed = rental("r1", RentalStatus::Completed, None);
        distributor
            .handle_change(changed("e3", ChangeKind::Update, completed, None))
            .await
            .unwrap();
        let notifications = distributor.get_notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, RenterNotificationType::RentalCompleted);
    }

    #[tokio::test]
    async fn test_payment_due_then_confirmed() {
        let (_store, distributor) = setup();
        let mut payment =
            Payment::new_pending("p1", "rider-1", "order-1", dec!(4500), "NOK", Utc::now());

        distributor
            .handle_change(ChangeEvent::PaymentChanged {
                event_id: "e1".to_string(),
                kind: ChangeKind::Insert,
                payment: payment.clone(),
                previous_status: None,
            })
            .await
            .unwrap();

        payment.status = PaymentStatus::Completed;
        for event_id in ["e2", "e3"] {
            distributor
                .handle_change(ChangeEvent::PaymentChanged {
                    event_id: event_id.to_string(),
                    kind: ChangeKind::Update,
                    payment: payment.clone(),
                    previous_status: None,
                })
                .await
                .unwrap();
        }

        let kinds: Vec<_> = distributor
            .get_notifications()
            .iter()
            .map(|n| n.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                RenterNotificationType::PaymentConfirmed,
                RenterNotificationType::PaymentDue
            ]
        );
        let due = distributor.get_action_required_notifications();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].message, "A payment of 4500.00 NOK is due.");
    }

    #[test]
    fn test_ending_soon_is_reminded_once() {
        let (store, distributor) = setup();
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        store.insert_rental(rental(
            "r-soon",
            RentalStatus::Active,
            NaiveDate::from_ymd_opt(2026, 6, 5),
        ));
        store.insert_rental(rental(
            "r-later",
            RentalStatus::Active,
            NaiveDate::from_ymd_opt(2026, 7, 1),
        ));
        store.insert_rental(rental(
            "r-open",
            RentalStatus::Active,
            None,
        ));

        assert_eq!(distributor.check_ending_soon(today).unwrap(), 1);
        assert_eq!(distributor.check_ending_soon(today).unwrap(), 0);

        let notifications = distributor.get_notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, RenterNotificationType::RentalEndingSoon);
        assert_eq!(
            notifications[0].message,
            "Your rental of Box 4 at Solbakken ends on 2026-06-05."
        );
    }
}
