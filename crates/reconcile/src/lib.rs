//! Stallplass Reconcile - Payment status polling with per-session backoff.
//!
//! [`PaymentReconciliationEngine`] keeps locally persisted payments in step
//! with the wallet provider. Sessions are independent; each owns one timer
//! obtained from a [`Scheduler`], so tests drive time with
//! [`ManualScheduler`] while the server runs on [`TokioScheduler`].

pub mod backoff;
pub mod config;
pub mod engine;
pub mod errors;
pub mod registry;
pub mod scheduler;
pub mod session;

pub use config::{PollingConfig, PollingOptions};
pub use engine::{
    PaymentReconciliationEngine, BROADCAST_CHANNEL, BROADCAST_EVENT, DEFAULT_RETENTION_HOURS,
};
pub use errors::{ReconcileError, Result};
pub use registry::{PollingStats, SessionRegistry};
pub use scheduler::{CancelHandle, ManualScheduler, ScheduledTask, Scheduler, TokioScheduler};
pub use session::{FailureReason, PollingSession, SessionStatus, MAX_ATTEMPTS_REACHED};
