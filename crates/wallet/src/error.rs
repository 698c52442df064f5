//! Error types for the wallet client.

use stallplass_core::payments::ProviderError;
use thiserror::Error;

/// Result type alias for wallet client operations.
pub type Result<T> = std::result::Result<T, WalletError>;

/// Errors that can occur while talking to the wallet provider.
#[derive(Debug, Error)]
pub enum WalletError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from the provider API
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid request (malformed reference, bad header value, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Access token could not be obtained
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl WalletError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }
}

/// Maps an HTTP error status from the provider to a classified error.
pub fn provider_error_for_status(status: u16, message: String) -> ProviderError {
    match status {
        400 => ProviderError::InvalidOrderId(message),
        401 => ProviderError::Unauthorized(message),
        403 => ProviderError::Forbidden(message),
        404 => ProviderError::PaymentNotFound(message),
        409 => ProviderError::AlreadyProcessed(message),
        408 | 429 | 500..=599 => ProviderError::Unavailable { status, message },
        _ => ProviderError::Other(format!("HTTP {status}: {message}")),
    }
}

impl From<WalletError> for ProviderError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::Http(e) if e.is_timeout() => ProviderError::Timeout(e.to_string()),
            WalletError::Http(e) => match e.status() {
                Some(status) => provider_error_for_status(status.as_u16(), e.to_string()),
                None => ProviderError::Network(e.to_string()),
            },
            WalletError::Json(e) => ProviderError::Other(format!("Malformed provider response: {e}")),
            WalletError::Api { status, message } => provider_error_for_status(status, message),
            WalletError::InvalidRequest(message) => ProviderError::InvalidOrderId(message),
            WalletError::Auth(message) => ProviderError::Unauthorized(message),
        }
    }
}
