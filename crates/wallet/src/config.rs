use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://apitest.vipps.no";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Tokens are refreshed this long before they expire.
pub const DEFAULT_TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Settings for [`WalletClient`](crate::WalletClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletClientConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub subscription_key: String,
    pub merchant_serial_number: String,
    pub timeout_secs: u64,
    pub token_refresh_margin_secs: i64,
    /// Reported to the provider in the system headers.
    pub system_name: String,
}

impl Default for WalletClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            subscription_key: String::new(),
            merchant_serial_number: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            token_refresh_margin_secs: DEFAULT_TOKEN_REFRESH_MARGIN_SECS,
            system_name: "stallplass".to_string(),
        }
    }
}

impl WalletClientConfig {
    /// True when every credential is present.
    pub fn has_credentials(&self) -> bool {
        [
            &self.client_id,
            &self.client_secret,
            &self.subscription_key,
            &self.merchant_serial_number,
        ]
        .iter()
        .all(|value| !value.trim().is_empty())
    }
}
