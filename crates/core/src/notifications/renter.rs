//! Notification rules for renters (riders).

use serde::{Deserialize, Serialize};

use super::model::{Category, NotificationData, NotificationDraft, NotificationKind, Priority};
use super::template::TemplateContext;
use crate::payments::Payment;
use crate::rentals::{Rental, RentalStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenterNotificationType {
    RequestSent,
    RentalConfirmed,
    RequestRejected,
    RentalStarted,
    RentalEndingSoon,
    RentalCompleted,
    PaymentDue,
    PaymentConfirmed,
}

impl NotificationKind for RenterNotificationType {
    fn title(self) -> &'static str {
        match self {
            Self::RequestSent => "Request sent",
            Self::RentalConfirmed => "Rental confirmed!",
            Self::RequestRejected => "Request rejected",
            Self::RentalStarted => "Rental started",
            Self::RentalEndingSoon => "Rental ending soon",
            Self::RentalCompleted => "Rental completed",
            Self::PaymentDue => "Payment due",
            Self::PaymentConfirmed => "Payment confirmed",
        }
    }

    fn priority(self) -> Priority {
        match self {
            Self::RequestSent | Self::RentalCompleted | Self::PaymentConfirmed => Priority::Low,
            Self::RequestRejected | Self::RentalStarted => Priority::Medium,
            Self::RentalConfirmed | Self::RentalEndingSoon => Priority::High,
            Self::PaymentDue => Priority::Urgent,
        }
    }

    fn category(self) -> Category {
        match self {
            Self::PaymentDue | Self::PaymentConfirmed => Category::Payment,
            _ => Category::Rental,
        }
    }

    fn action_required(self) -> bool {
        matches!(self, Self::PaymentDue)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum RenterEvent<'a> {
    RequestSent {
        rental: &'a Rental,
        context: &'a TemplateContext,
    },
    StatusChanged {
        rental: &'a Rental,
        to: RentalStatus,
        context: &'a TemplateContext,
    },
    EndingSoon {
        rental: &'a Rental,
        context: &'a TemplateContext,
    },
    PaymentDue {
        payment: &'a Payment,
        context: &'a TemplateContext,
    },
    PaymentConfirmed {
        payment: &'a Payment,
        context: &'a TemplateContext,
    },
}

/// Maps a renter event to a notification draft.
///
/// Any move to `CANCELLED` reads as a rejection from the renter's side.
pub fn renter_notification(
    event: &RenterEvent<'_>,
) -> Option<NotificationDraft<RenterNotificationType>> {
    use RenterNotificationType as T;

    let draft = match *event {
        RenterEvent::RequestSent { rental, context } => NotificationDraft::new(
            T::RequestSent,
            format!(
                "Your rental request{}{} has been sent{}.",
                context.box_clause("for"),
                context.stable_clause("at"),
                TemplateContext::clause("to", context.counterpart_name.as_deref()),
            ),
            rental_data(rental, context),
        ),
        RenterEvent::StatusChanged {
            rental,
            to,
            context,
        } => {
            let (kind, message) = match to {
                RentalStatus::Confirmed => (
                    T::RentalConfirmed,
                    format!(
                        "Your rental{}{} has been confirmed{}.",
                        context.box_clause("of"),
                        context.stable_clause("at"),
                        context.by_counterpart(),
                    ),
                ),
                RentalStatus::Cancelled => (
                    T::RequestRejected,
                    format!(
                        "Your rental request{}{} was not accepted.",
                        context.box_clause("for"),
                        context.stable_clause("at"),
                    ),
                ),
                RentalStatus::Active => (
                    T::RentalStarted,
                    format!(
                        "Your rental{}{} has started.",
                        context.box_clause("of"),
                        context.stable_clause("at"),
                    ),
                ),
                RentalStatus::Completed => (
                    T::RentalCompleted,
                    format!(
                        "Your rental{}{} has been completed.",
                        context.box_clause("of"),
                        context.stable_clause("at"),
                    ),
                ),
                RentalStatus::Pending => return None,
            };
            NotificationDraft::new(kind, message, rental_data(rental, context))
        }
        RenterEvent::EndingSoon { rental, context } => NotificationDraft::new(
            T::RentalEndingSoon,
            format!(
                "Your rental{}{} ends{}.",
                context.box_clause("of"),
                context.stable_clause("at"),
                context.end_date_clause("on"),
            ),
            rental_data(rental, context),
        ),
        RenterEvent::PaymentDue { payment, context } => NotificationDraft::new(
            T::PaymentDue,
            format!(
                "A payment{}{} is due.",
                context.amount_clause("of"),
                context.box_clause("for"),
            ),
            payment_data(payment),
        ),
        RenterEvent::PaymentConfirmed { payment, context } => NotificationDraft::new(
            T::PaymentConfirmed,
            format!(
                "Your payment{}{} has been confirmed.",
                context.amount_clause("of"),
                context.box_clause("for"),
            ),
            payment_data(payment),
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

fn payment_data(payment: &Payment) -> NotificationData {
    NotificationData {
        rental_id: payment.rental_id.clone(),
        payment_id: Some(payment.id.clone()),
        box_id: payment.box_id.clone(),
        amount: Some(payment.amount),
        ..Default::default()
    }
}
