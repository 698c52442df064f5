//! Payments module.
//!
//! - **Errors** (`errors.rs`) - Payment and provider errors, retry classification
//! - **Model** (`model.rs`) - Persisted payment record and its status lifecycle
//! - **Provider** (`provider.rs`) - Wallet-payment provider contract and a scripted mock
//! - **Traits** (`traits.rs`) - Persistence contract used by the reconciliation engine

mod errors;
mod model;
mod provider;
mod traits;

pub use errors::{is_critical_message, PaymentError, ProviderError, RetryClass, CRITICAL_ERROR_PATTERNS};
pub use model::{Payment, PaymentStatus};
pub use provider::{MockPaymentProvider, PaymentProviderClient, ProviderPaymentStatus, ProviderState};
pub use traits::PaymentRepositoryTrait;
