//! Core error types for Stallplass.
//!
//! This module defines storage-agnostic error types. Store-specific and
//! transport-specific errors are converted to these types at the boundary.

use thiserror::Error;

use crate::events::FeedError;
use crate::payments::{PaymentError, ProviderError, RetryClass};
use crate::rentals::RentalError;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the reconciliation subsystem.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Payment operation failed: {0}")]
    Payment(#[from] PaymentError),

    #[error("Rental operation failed: {0}")]
    Rental(#[from] RentalError),

    #[error("Payment provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Change feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Input validation failed: {0}")]
    Validation(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Returns the retry classification for an error raised during a
    /// reconciliation attempt.
    ///
    /// Provider errors carry their own classification. A missing payment is
    /// terminal. Everything else is matched against the critical message
    /// patterns and otherwise treated as transient.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Provider(err) => err.retry_class(),
            Self::Payment(PaymentError::NotFound(_)) => RetryClass::Never,
            other => {
                if crate::payments::is_critical_message(&other.to_string()) {
                    RetryClass::Never
                } else {
                    RetryClass::WithBackoff
                }
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Validation(err.to_string())
    }
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}
