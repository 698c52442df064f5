//! Stallplass Wallet - HTTP client for the wallet-payment provider.
//!
//! Implements [`PaymentProviderClient`](stallplass_core::payments::PaymentProviderClient)
//! over the provider's ePayment API.

mod client;
mod config;
mod error;
mod token;
mod types;

pub use client::{idempotency_key, WalletClient};
pub use config::{
    WalletClientConfig, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS, DEFAULT_TOKEN_REFRESH_MARGIN_SECS,
};
pub use error::{provider_error_for_status, Result, WalletError};
pub use token::CachedToken;
pub use types::{AccessTokenResponse, Aggregate, Amount, ApiErrorResponse, CaptureRequest, PaymentResponse};
