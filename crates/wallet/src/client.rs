//! Wallet-payment provider API client.
//!
//! Reads payment state from the ePayment API and captures authorized
//! payments. Access tokens are fetched on demand and cached until shortly
//! before they expire.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use stallplass_core::payments::{PaymentProviderClient, ProviderError, ProviderPaymentStatus};
use tokio::sync::Mutex;

use crate::config::WalletClientConfig;
use crate::error::{Result, WalletError};
use crate::token::CachedToken;
use crate::types::*;

const SUBSCRIPTION_KEY_HEADER: &str = "ocp-apim-subscription-key";
const MERCHANT_SERIAL_HEADER: &str = "merchant-serial-number";
const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
const SYSTEM_NAME_HEADER: &str = "vipps-system-name";

/// Client for the provider's REST API.
pub struct WalletClient {
    client: reqwest::Client,
    config: WalletClientConfig,
    token: Mutex<Option<CachedToken>>,
}

impl WalletClient {
    pub fn new(mut config: WalletClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &WalletClientConfig {
        &self.config
    }

    fn header_value(value: &str, name: &str) -> Result<HeaderValue> {
        HeaderValue::from_str(value)
            .map_err(|_| WalletError::invalid_request(format!("Invalid {name} header value")))
    }

    /// Headers shared by every call.
    fn base_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static(SUBSCRIPTION_KEY_HEADER),
            Self::header_value(&self.config.subscription_key, "subscription key")?,
        );
        headers.insert(
            HeaderName::from_static(MERCHANT_SERIAL_HEADER),
            Self::header_value(&self.config.merchant_serial_number, "merchant serial")?,
        );
        headers.insert(
            HeaderName::from_static(SYSTEM_NAME_HEADER),
            Self::header_value(&self.config.system_name, "system name")?,
        );
        Ok(headers)
    }

    /// Headers for an authenticated ePayment call.
    async fn api_headers(&self) -> Result<HeaderMap> {
        let token = self.access_token().await?;
        let mut headers = self.base_headers()?;
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| WalletError::auth("Invalid access token format"))?,
        );
        Ok(headers)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        debug!("Wallet API response ({}): {}", status, body);

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .ok()
                .and_then(|error| error.message())
                .unwrap_or_else(|| format!("Request failed: {}", body));
            return Err(WalletError::api(status.as_u16(), message));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!("Failed to deserialize wallet response. Body: {}, Error: {}", body, e);
            WalletError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    /// Returns a cached token, fetching a new one when it is missing or
    /// about to expire.
    ///
    /// POST /accesstoken/get
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(now, self.config.token_refresh_margin_secs) {
                return Ok(token.value.clone());
            }
        }

        if !self.config.has_credentials() {
            return Err(WalletError::auth("Wallet credentials are not configured"));
        }

        let url = format!("{}/accesstoken/get", self.config.base_url);
        let mut headers = self.base_headers()?;
        headers.insert(
            HeaderName::from_static("client_id"),
            Self::header_value(&self.config.client_id, "client id")?,
        );
        headers.insert(
            HeaderName::from_static("client_secret"),
            Self::header_value(&self.config.client_secret, "client secret")?,
        );

        let response = self.client.post(&url).headers(headers).send().await?;
        let token: AccessTokenResponse = Self::parse_response(response)
            .await
            .map_err(|e| match e {
                WalletError::Api { status, message } if status == 401 || status == 403 => {
                    WalletError::auth(message)
                }
                other => other,
            })?;

        info!("Fetched wallet access token valid for {}s", token.expires_in);
        let fresh = CachedToken::new(token.access_token, token.expires_in, now);
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    /// Drops the cached token so the next call fetches a new one.
    pub async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Gets a payment by reference.
    ///
    /// GET /epayment/v1/payments/{reference}
    pub async fn get_payment(&self, reference: &str) -> Result<PaymentResponse> {
        let url = format!(
            "{}/epayment/v1/payments/{}",
            self.config.base_url,
            urlencoding::encode(reference)
        );

        let response = self
            .client
            .get(&url)
            .headers(self.api_headers().await?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Captures `amount_minor` of an authorized payment. The reference and
    /// amount form the idempotency key, so a retried capture is not applied
    /// twice.
    ///
    /// POST /epayment/v1/payments/{reference}/capture
    pub async fn capture_payment(
        &self,
        reference: &str,
        amount_minor: i64,
        currency: &str,
    ) -> Result<PaymentResponse> {
        let url = format!(
            "{}/epayment/v1/payments/{}/capture",
            self.config.base_url,
            urlencoding::encode(reference)
        );
        let mut headers = self.api_headers().await?;
        headers.insert(
            HeaderName::from_static(IDEMPOTENCY_KEY_HEADER),
            Self::header_value(&idempotency_key(reference, amount_minor), "idempotency key")?,
        );
        let body = CaptureRequest {
            modification_amount: Amount {
                value: amount_minor,
                currency: currency.to_string(),
            },
        };
        debug!("Capturing {} minor units of {}", amount_minor, reference);

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn with_token_retry<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        match call().await {
            Err(WalletError::Api { status: 401, .. }) => {
                debug!("Wallet token rejected, refreshing once");
                self.invalidate_token().await;
                call().await
            }
            other => other,
        }
    }
}

/// Deterministic key for a capture of `amount_minor` on `reference`.
pub fn idempotency_key(reference: &str, amount_minor: i64) -> String {
    let name = format!("capture:{reference}:{amount_minor}");
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

#[async_trait]
impl PaymentProviderClient for WalletClient {
    async fn check_status(
        &self,
        provider_order_id: &str,
    ) -> std::result::Result<ProviderPaymentStatus, ProviderError> {
        let response = self
            .with_token_retry(|| self.get_payment(provider_order_id))
            .await?;
        Ok(response.into())
    }

    async fn capture(
        &self,
        provider_order_id: &str,
        amount_minor: i64,
    ) -> std::result::Result<ProviderPaymentStatus, ProviderError> {
        let current = self
            .with_token_retry(|| self.get_payment(provider_order_id))
            .await?;
        let currency = current
            .amount
            .as_ref()
            .map(|a| a.currency.clone())
            .unwrap_or_else(|| "NOK".to_string());
        let response = self
            .with_token_retry(|| self.capture_payment(provider_order_id, amount_minor, &currency))
            .await?;
        Ok(response.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_is_stable_per_capture() {
        let first = idempotency_key("order-1", 450000);
        assert_eq!(first, idempotency_key("order-1", 450000));
        assert_ne!(first, idempotency_key("order-1", 100));
        assert_ne!(first, idempotency_key("order-2", 450000));
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_any_request() {
        let client = WalletClient::new(WalletClientConfig::default()).unwrap();
        let error = client.access_token().await.unwrap_err();
        assert!(matches!(error, WalletError::Auth(_)));

        let error = client.check_status("order-1").await.unwrap_err();
        assert!(error.is_critical());
    }

    #[test]
    fn test_base_url_is_normalized() {
        let client = WalletClient::new(WalletClientConfig {
            base_url: "https://example.test/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.config().base_url, "https://example.test");
    }
}
