//! Payment errors and retry classification for provider failures.

use thiserror::Error;

/// Message fragments that mark a provider failure as critical.
///
/// A critical failure fails the polling session immediately instead of
/// retrying under backoff. Matching is case-insensitive.
pub const CRITICAL_ERROR_PATTERNS: &[&str] = &[
    "payment not found",
    "invalid order id",
    "unauthorized",
    "forbidden",
    "already processed",
];

/// Returns true when the message contains one of the critical patterns.
pub fn is_critical_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    CRITICAL_ERROR_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

/// Classification for retry policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Never retry - the order is unknown, credentials are rejected, or the
    /// payment was already settled. Retrying won't help.
    Never,

    /// Transient failure (timeout, 5xx, rate limit, connection drop).
    /// Retry on the session's backoff schedule.
    WithBackoff,
}

/// Errors raised while reading or mutating persisted payments.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("Payment not found: {0}")]
    NotFound(String),

    #[error("Payment {payment_id} cannot move from {from} to {to}")]
    StatusRegression {
        payment_id: String,
        from: String,
        to: String,
    },

    #[error("Payment {0} has no amount to capture")]
    NothingToCapture(String),
}

/// Errors returned by the wallet-payment provider.
///
/// Each variant is classified into a [`RetryClass`] via
/// [`retry_class`](Self::retry_class).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider has no payment for this reference.
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    /// The reference is malformed or rejected by the provider.
    #[error("Invalid order id: {0}")]
    InvalidOrderId(String),

    /// Credentials were missing, expired or rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The merchant is not allowed to act on this payment.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The operation conflicts with the payment's current state.
    #[error("Payment already processed: {0}")]
    AlreadyProcessed(String),

    /// The request timed out.
    #[error("Provider timeout: {0}")]
    Timeout(String),

    /// The provider answered with a transient status (408, 429, 5xx).
    #[error("Provider unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    /// The connection failed before a response was received.
    #[error("Network error: {0}")]
    Network(String),

    /// Any other provider failure; classified by message.
    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Returns the retry classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use stallplass_core::payments::{ProviderError, RetryClass};
    ///
    /// let error = ProviderError::Timeout("check_status".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::WithBackoff);
    ///
    /// let error = ProviderError::Other("Unauthorized merchant".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::PaymentNotFound(_)
            | Self::InvalidOrderId(_)
            | Self::Unauthorized(_)
            | Self::Forbidden(_)
            | Self::AlreadyProcessed(_) => RetryClass::Never,

            Self::Timeout(_) | Self::Unavailable { .. } | Self::Network(_) => {
                RetryClass::WithBackoff
            }

            Self::Other(message) => {
                if is_critical_message(message) {
                    RetryClass::Never
                } else {
                    RetryClass::WithBackoff
                }
            }
        }
    }

    /// Shorthand for `retry_class() == RetryClass::Never`.
    pub fn is_critical(&self) -> bool {
        self.retry_class() == RetryClass::Never
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_critical_errors_never_retry() {
        let errors = [
            ProviderError::PaymentNotFound("o1".to_string()),
            ProviderError::InvalidOrderId("??".to_string()),
            ProviderError::Unauthorized("token".to_string()),
            ProviderError::Forbidden("msn".to_string()),
            ProviderError::AlreadyProcessed("o1".to_string()),
        ];
        for error in errors {
            assert!(error.is_critical(), "{} should be critical", error);
        }
    }

    #[test]
    fn test_transient_errors_retry_with_backoff() {
        let errors = [
            ProviderError::Timeout("check_status".to_string()),
            ProviderError::Unavailable {
                status: 503,
                message: "maintenance".to_string(),
            },
            ProviderError::Network("connection reset".to_string()),
            ProviderError::Other("upstream hiccup".to_string()),
        ];
        for error in errors {
            assert_eq!(error.retry_class(), RetryClass::WithBackoff);
        }
    }

    #[test]
    fn test_untyped_errors_match_patterns_case_insensitively() {
        assert!(ProviderError::Other("UNAUTHORIZED request".to_string()).is_critical());
        assert!(ProviderError::Other("Order was Already Processed".to_string()).is_critical());
        assert!(ProviderError::Other("invalid order id: abc".to_string()).is_critical());
        assert!(!ProviderError::Other("gateway timeout".to_string()).is_critical());
    }

    #[test]
    fn test_display_contains_pattern_for_typed_variants() {
        // The typed variants render with their pattern so string-based
        // consumers (session.error) keep the same classification.
        let error = ProviderError::PaymentNotFound("o1".to_string());
        assert!(is_critical_message(&error.to_string()));
        let error = ProviderError::AlreadyProcessed("o1".to_string());
        assert!(is_critical_message(&error.to_string()));
    }
}
