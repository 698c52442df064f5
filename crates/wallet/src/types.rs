//! Wire types for the provider's ePayment and access-token APIs.

use serde::{Deserialize, Deserializer, Serialize};
use stallplass_core::payments::{ProviderPaymentStatus, ProviderState};

/// Response of `POST /accesstoken/get`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds. The provider sends it as a string.
    #[serde(deserialize_with = "seconds_from_string_or_number")]
    pub expires_in: i64,
}

fn seconds_from_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(i64),
        Text(String),
    }
    match Seconds::deserialize(deserializer)? {
        Seconds::Number(n) => Ok(n),
        Seconds::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// An amount in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub value: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub authorized_amount: Option<Amount>,
    pub captured_amount: Option<Amount>,
    pub refunded_amount: Option<Amount>,
    pub cancelled_amount: Option<Amount>,
}

/// Response of `GET /epayment/v1/payments/{reference}` and of capture.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub reference: String,
    pub state: ProviderState,
    #[serde(default)]
    pub aggregate: Aggregate,
    #[serde(default)]
    pub amount: Option<Amount>,
}

impl From<PaymentResponse> for ProviderPaymentStatus {
    fn from(response: PaymentResponse) -> Self {
        let aggregate = response.aggregate;
        let currency = [
            &response.amount,
            &aggregate.authorized_amount,
            &aggregate.captured_amount,
        ]
        .into_iter()
        .flatten()
        .map(|a| a.currency.clone())
        .next()
        .unwrap_or_else(|| "NOK".to_string());
        let value = |amount: &Option<Amount>| amount.as_ref().map_or(0, |a| a.value);

        ProviderPaymentStatus {
            reference: response.reference,
            state: response.state,
            authorized_amount: value(&aggregate.authorized_amount),
            captured_amount: value(&aggregate.captured_amount),
            refunded_amount: value(&aggregate.refunded_amount),
            cancelled_amount: value(&aggregate.cancelled_amount),
            currency,
        }
    }
}

/// Body of `POST /epayment/v1/payments/{reference}/capture`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub modification_amount: Amount,
}

/// Problem-details error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ApiErrorResponse {
    pub fn message(&self) -> Option<String> {
        match (&self.title, &self.detail) {
            (Some(title), Some(detail)) => Some(format!("{title}: {detail}")),
            (Some(one), None) | (None, Some(one)) => Some(one.clone()),
            (None, None) => None,
        }
    }
}
