//! Persisted payment record and status lifecycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::provider::ProviderState;

/// Local payment status.
///
/// Moves one way only: `PENDING → PROCESSING → {COMPLETED | FAILED | CANCELLED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    /// Maps a provider state onto the local status.
    ///
    /// `CREATED` has no mapping: the local record keeps whatever it has.
    pub fn from_provider_state(state: ProviderState) -> Option<Self> {
        match state {
            ProviderState::Created => None,
            ProviderState::Authorized => Some(Self::Processing),
            ProviderState::Aborted | ProviderState::Expired => Some(Self::Failed),
            ProviderState::Terminated => Some(Self::Cancelled),
        }
    }

    /// Human-readable failure reason recorded alongside a failed or
    /// cancelled payment.
    pub fn failure_reason_for(state: ProviderState) -> Option<&'static str> {
        match state {
            ProviderState::Aborted => Some("Payment aborted by user"),
            ProviderState::Expired => Some("Payment expired"),
            ProviderState::Terminated => Some("Payment terminated by merchant"),
            ProviderState::Created | ProviderState::Authorized => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed | Self::Cancelled => 2,
        }
    }

    /// Whether a write of `next` is a forward move from `self`.
    ///
    /// Same-status writes and regressions are rejected, and terminal
    /// statuses have no outgoing moves.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment as persisted by the marketplace store.
///
/// The reconciliation engine only ever changes `status`, `paid_at`,
/// `failed_at`, `failure_reason` and the provider metadata fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    /// Paying user (the renter).
    pub user_id: String,
    pub stable_id: Option<String>,
    pub box_id: Option<String>,
    pub rental_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    /// Reference of the payment at the wallet provider.
    pub provider_order_id: String,
    pub provider_state: Option<ProviderState>,
    pub captured_amount_minor: Option<i64>,
    pub paid_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a new pending payment.
    pub fn new_pending(
        id: impl Into<String>,
        user_id: impl Into<String>,
        provider_order_id: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            stable_id: None,
            box_id: None,
            rental_id: None,
            amount,
            currency: currency.into(),
            status: PaymentStatus::Pending,
            provider_order_id: provider_order_id.into(),
            provider_state: None,
            captured_amount_minor: None,
            paid_at: None,
            failed_at: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a provider state observation.
    ///
    /// Records the provider state, then moves the local status forward if
    /// the mapping allows it. Returns true when the status changed.
    /// Applying the same state twice is a no-op: timestamps set by the first
    /// write are kept.
    pub fn apply_provider_state(&mut self, state: ProviderState, now: DateTime<Utc>) -> bool {
        let metadata_changed = self.provider_state != Some(state);
        self.provider_state = Some(state);

        let Some(next) = PaymentStatus::from_provider_state(state) else {
            if metadata_changed {
                self.updated_at = now;
            }
            return false;
        };

        if !self.status.can_transition_to(next) {
            if metadata_changed {
                self.updated_at = now;
            }
            return false;
        }

        self.status = next;
        self.updated_at = now;
        if next == PaymentStatus::Failed || next == PaymentStatus::Cancelled {
            if self.failed_at.is_none() {
                self.failed_at = Some(now);
            }
            if self.failure_reason.is_none() {
                self.failure_reason = PaymentStatus::failure_reason_for(state).map(str::to_string);
            }
        }
        true
    }

    /// Marks the payment as captured (money moved).
    ///
    /// Returns true when the status changed; `paid_at` is only ever set once.
    pub fn mark_captured(&mut self, captured_minor: i64, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(PaymentStatus::Completed) {
            return false;
        }
        self.status = PaymentStatus::Completed;
        self.captured_amount_minor = Some(captured_minor);
        if self.paid_at.is_none() {
            self.paid_at = Some(now);
        }
        self.updated_at = now;
        true
    }

    /// Amount in minor currency units (øre, cents).
    pub fn amount_minor(&self) -> i64 {
        use rust_decimal::prelude::ToPrimitive;
        (self.amount * Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn pending() -> Payment {
        Payment::new_pending("pay-1", "rider-1", "order-1", dec!(4500), "NOK", Utc::now())
    }

    #[test]
    fn test_provider_state_mapping() {
        assert_eq!(PaymentStatus::from_provider_state(ProviderState::Created), None);
        assert_eq!(
            PaymentStatus::from_provider_state(ProviderState::Authorized),
            Some(PaymentStatus::Processing)
        );
        assert_eq!(
            PaymentStatus::from_provider_state(ProviderState::Aborted),
            Some(PaymentStatus::Failed)
        );
        assert_eq!(
            PaymentStatus::from_provider_state(ProviderState::Expired),
            Some(PaymentStatus::Failed)
        );
        assert_eq!(
            PaymentStatus::from_provider_state(ProviderState::Terminated),
            Some(PaymentStatus::Cancelled)
        );
    }

    #[test]
    fn test_status_never_regresses() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Processing));
        assert!(PaymentStatus::Processing.can_transition_to(PaymentStatus::Completed));
        assert!(!PaymentStatus::Processing.can_transition_to(PaymentStatus::Pending));
        assert!(!PaymentStatus::Completed.can_transition_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Processing));
        assert!(!PaymentStatus::Pending.can_transition_to(PaymentStatus::Pending));
    }

    #[test]
    fn test_created_leaves_status_unchanged() {
        let mut payment = pending();
        assert!(!payment.apply_provider_state(ProviderState::Created, Utc::now()));
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.provider_state, Some(ProviderState::Created));
    }

    #[test]
    fn test_repeated_terminal_state_is_idempotent() {
        let mut payment = pending();
        let first = Utc::now();
        assert!(payment.apply_provider_state(ProviderState::Aborted, first));
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.failed_at, Some(first));
        assert_eq!(payment.failure_reason.as_deref(), Some("Payment aborted by user"));

        let later = first + Duration::minutes(5);
        assert!(!payment.apply_provider_state(ProviderState::Aborted, later));
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.failed_at, Some(first));
    }

    #[test]
    fn test_late_authorized_does_not_reopen_failed_payment() {
        let mut payment = pending();
        payment.apply_provider_state(ProviderState::Expired, Utc::now());
        assert!(!payment.apply_provider_state(ProviderState::Authorized, Utc::now()));
        assert_eq!(payment.status, PaymentStatus::Failed);
    }

    #[test]
    fn test_capture_sets_paid_at_once() {
        let mut payment = pending();
        let first = Utc::now();
        payment.apply_provider_state(ProviderState::Authorized, first);
        assert!(payment.mark_captured(450_000, first));
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.paid_at, Some(first));

        assert!(!payment.mark_captured(450_000, first + Duration::hours(1)));
        assert_eq!(payment.paid_at, Some(first));
    }

    #[test]
    fn test_amount_minor() {
        let mut payment = pending();
        assert_eq!(payment.amount_minor(), 450_000);
        payment.amount = dec!(12.345);
        assert_eq!(payment.amount_minor(), 1234);
    }
}
