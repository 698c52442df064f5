//! Wallet-payment provider contract.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::errors::ProviderError;

/// Payment state as reported by the wallet provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderState {
    Created,
    Authorized,
    Aborted,
    Expired,
    Terminated,
}

impl ProviderState {
    /// Every state except `CREATED` ends a polling session.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Created)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Authorized => "AUTHORIZED",
            Self::Aborted => "ABORTED",
            Self::Expired => "EXPIRED",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl std::fmt::Display for ProviderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a status or capture call. Amounts are in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderPaymentStatus {
    pub reference: String,
    pub state: ProviderState,
    pub authorized_amount: i64,
    pub captured_amount: i64,
    pub refunded_amount: i64,
    pub cancelled_amount: i64,
    pub currency: String,
}

impl ProviderPaymentStatus {
    pub fn new(reference: impl Into<String>, state: ProviderState) -> Self {
        Self {
            reference: reference.into(),
            state,
            authorized_amount: 0,
            captured_amount: 0,
            refunded_amount: 0,
            cancelled_amount: 0,
            currency: "NOK".to_string(),
        }
    }

    pub fn with_authorized(mut self, amount: i64) -> Self {
        self.authorized_amount = amount;
        self
    }
}

/// Client for the wallet-payment provider.
#[async_trait]
pub trait PaymentProviderClient: Send + Sync {
    /// Fetches the current state of a payment.
    async fn check_status(&self, provider_order_id: &str)
        -> Result<ProviderPaymentStatus, ProviderError>;

    /// Captures `amount_minor` of an authorized payment.
    async fn capture(
        &self,
        provider_order_id: &str,
        amount_minor: i64,
    ) -> Result<ProviderPaymentStatus, ProviderError>;
}

type Scripted = Result<ProviderPaymentStatus, ProviderError>;

/// Scripted provider for tests.
///
/// Responses are queued per order id and consumed in order; the last one
/// stays in place and is returned for every later call.
#[derive(Default)]
pub struct MockPaymentProvider {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    status_calls: Mutex<HashMap<String, usize>>,
    captures: Mutex<Vec<(String, i64)>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a state for the given order.
    pub fn push_state(&self, provider_order_id: &str, state: ProviderState) {
        self.push(
            provider_order_id,
            Ok(ProviderPaymentStatus::new(provider_order_id, state)),
        );
    }

    /// Queues an error for the given order.
    pub fn push_error(&self, provider_order_id: &str, error: ProviderError) {
        self.push(provider_order_id, Err(error));
    }

    pub fn push(&self, provider_order_id: &str, response: Scripted) {
        locked(&self.scripts)
            .entry(provider_order_id.to_string())
            .or_default()
            .push_back(response);
    }

    /// Number of `check_status` calls made for an order.
    pub fn status_calls(&self, provider_order_id: &str) -> usize {
        locked(&self.status_calls)
            .get(provider_order_id)
            .copied()
            .unwrap_or_default()
    }

    /// Captures requested so far, as `(order, amount_minor)`.
    pub fn captures(&self) -> Vec<(String, i64)> {
        locked(&self.captures).clone()
    }

    fn next(&self, provider_order_id: &str) -> Scripted {
        let mut scripts = locked(&self.scripts);
        let Some(queue) = scripts.get_mut(provider_order_id) else {
            return Err(ProviderError::PaymentNotFound(provider_order_id.to_string()));
        };
        if queue.len() > 1 {
            if let Some(response) = queue.pop_front() {
                return response;
            }
        }
        queue
            .front()
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::PaymentNotFound(provider_order_id.to_string())))
    }
}

#[async_trait]
impl PaymentProviderClient for MockPaymentProvider {
    async fn check_status(
        &self,
        provider_order_id: &str,
    ) -> Result<ProviderPaymentStatus, ProviderError> {
        *locked(&self.status_calls)
            .entry(provider_order_id.to_string())
            .or_default() += 1;
        self.next(provider_order_id)
    }

    async fn capture(
        &self,
        provider_order_id: &str,
        amount_minor: i64,
    ) -> Result<ProviderPaymentStatus, ProviderError> {
        locked(&self.captures)
            .push((provider_order_id.to_string(), amount_minor));
        let mut status = self.next(provider_order_id)?;
        status.captured_amount = amount_minor;
        Ok(status)
    }
}
