use stallplass_core::payments::{PaymentError, ProviderError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Errors returned synchronously by the engine.
///
/// Failures inside a polling attempt never surface here; they end up on
/// the session instead.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Invalid polling configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error(transparent)]
    Core(#[from] stallplass_core::Error),

    #[error("Payment provider call failed: {0}")]
    Provider(#[from] ProviderError),
}

impl From<PaymentError> for ReconcileError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::NotFound(id) => Self::PaymentNotFound(id),
            other => Self::Core(other.into()),
        }
    }
}
