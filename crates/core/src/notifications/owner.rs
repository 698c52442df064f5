//! Notification rules for stable owners.

use serde::{Deserialize, Serialize};

use super::model::{Category, NotificationData, NotificationDraft, NotificationKind, Priority};
use super::template::TemplateContext;
use crate::conversations::Message;
use crate::payments::Payment;
use crate::rentals::{Rental, RentalConflict, RentalStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnerNotificationType {
    NewRentalRequest,
    RentalConfirmed,
    RentalCancelled,
    RentalActivated,
    RentalCompleted,
    RentalConflict,
    PaymentReceived,
    NewMessage,
}

impl NotificationKind for OwnerNotificationType {
    fn title(self) -> &'static str {
        match self {
            Self::NewRentalRequest => "New rental request",
            Self::RentalConfirmed => "Rental confirmed",
            Self::RentalCancelled => "Rental cancelled",
            Self::RentalActivated => "Rental activated",
            Self::RentalCompleted => "Rental completed",
            Self::RentalConflict => "Rental conflict detected",
            Self::PaymentReceived => "Payment received",
            Self::NewMessage => "New message",
        }
    }

    fn priority(self) -> Priority {
        match self {
            Self::NewRentalRequest => Priority::High,
            Self::RentalConfirmed | Self::RentalCancelled => Priority::Medium,
            Self::RentalActivated | Self::RentalCompleted => Priority::Low,
            Self::RentalConflict => Priority::Urgent,
            Self::PaymentReceived | Self::NewMessage => Priority::Medium,
        }
    }

    fn category(self) -> Category {
        match self {
            Self::PaymentReceived => Category::Payment,
            Self::NewMessage => Category::Message,
            _ => Category::Rental,
        }
    }

    fn action_required(self) -> bool {
        matches!(self, Self::NewRentalRequest | Self::RentalConflict)
    }
}

/// A classified event as seen by an owner.
#[derive(Debug, Clone, Copy)]
pub enum OwnerEvent<'a> {
    NewRequest {
        rental: &'a Rental,
        context: &'a TemplateContext,
    },
    StatusChanged {
        rental: &'a Rental,
        to: RentalStatus,
        context: &'a TemplateContext,
    },
    ConflictDetected {
        conflict: &'a RentalConflict,
        context: &'a TemplateContext,
    },
    PaymentCompleted {
        payment: &'a Payment,
        context: &'a TemplateContext,
    },
    MessageReceived {
        message: &'a Message,
        context: &'a TemplateContext,
    },
}

/// Maps an owner event to a notification draft.
///
/// Returns `None` for status changes with no owner notification (moves
/// back to `PENDING` never happen through the state machine).
pub fn owner_notification(event: &OwnerEvent<'_>) -> Option<NotificationDraft<OwnerNotificationType>> {
    use OwnerNotificationType as T;

    let draft = match *event {
        OwnerEvent::NewRequest { rental, context } => NotificationDraft::new(
            T::NewRentalRequest,
            format!(
                "You have a new rental request{}{}{}.",
                context.from_counterpart(),
                context.box_clause("for"),
                context.stable_clause("at"),
            ),
            rental_data(rental, context),
        ),
        OwnerEvent::StatusChanged {
            rental,
            to,
            context,
        } => {
            let (kind, verb) = match to {
                RentalStatus::Confirmed => (T::RentalConfirmed, "has been confirmed"),
                RentalStatus::Cancelled => (T::RentalCancelled, "has been cancelled"),
                RentalStatus::Active => (T::RentalActivated, "is now active"),
                RentalStatus::Completed => (T::RentalCompleted, "has been completed"),
                RentalStatus::Pending => return None,
            };
            NotificationDraft::new(
                kind,
                format!(
                    "The rental{}{} {}.",
                    context.box_clause("of"),
                    context.by_counterpart(),
                    verb
                ),
                rental_data(rental, context),
            )
        }
        OwnerEvent::ConflictDetected { conflict, context } => NotificationDraft::new(
            T::RentalConflict,
            format!(
                "Double booking detected{}: {} rentals are active at the same time.",
                context.box_clause("for"),
                conflict.rental_ids.len()
            ),
            NotificationData {
                rental_id: conflict.rental_ids.last().cloned(),
                box_id: Some(conflict.box_id.clone()),
                conflict_type: Some(conflict.conflict_type.as_str().to_string()),
                ..Default::default()
            },
        ),
        OwnerEvent::PaymentCompleted { payment, context } => NotificationDraft::new(
            T::PaymentReceived,
            format!(
                "You received a payment{}{}{}.",
                context.amount_clause("of"),
                context.from_counterpart(),
                context.box_clause("for"),
            ),
            NotificationData {
                rental_id: payment.rental_id.clone(),
                payment_id: Some(payment.id.clone()),
                box_id: payment.box_id.clone(),
                amount: Some(payment.amount),
                ..Default::default()
            },
        ),
        OwnerEvent::MessageReceived { message: _, context } => NotificationDraft::new(
            T::NewMessage,
            format!(
                "You have a new message{}{}.",
                context.from_counterpart(),
                context.stable_clause("about"),
            ),
            NotificationData::default(),
        ),
    };
    Some(draft)
}

fn rental_data(rental: &Rental, context: &TemplateContext) -> NotificationData {
    NotificationData {
        rental_id: Some(rental.id.clone()),
        box_id: Some(rental.box_id.clone()),
        amount: context.amount.or(rental.monthly_price),
        ..Default::default()
    }
}
