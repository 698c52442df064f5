use async_trait::async_trait;

use super::model::Payment;
use super::provider::ProviderState;
use crate::errors::Result;

/// Persistence contract for payments.
#[async_trait]
pub trait PaymentRepositoryTrait: Send + Sync {
    fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>>;

    /// Records a provider state observation for the payment with this
    /// provider reference and returns the stored record.
    ///
    /// Idempotent: repeating a terminal state leaves status and timestamps
    /// as they were.
    async fn update_payment_status(
        &self,
        provider_order_id: &str,
        state: ProviderState,
    ) -> Result<Payment>;

    /// Marks the payment captured. `paid_at` is set on the first call only.
    async fn mark_payment_captured(
        &self,
        provider_order_id: &str,
        captured_minor: i64,
    ) -> Result<Payment>;
}
