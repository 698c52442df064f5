//! Polling session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stallplass_core::payments::ProviderState;

/// Session error message when the attempt budget runs out.
pub const MAX_ATTEMPTS_REACHED: &str = "max attempts reached";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a session ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    MaxAttemptsReached,
    CriticalError,
}

/// One payment being reconciled.
///
/// `status` leaves `active` exactly once. `next_attempt_time` is only set
/// while the session is active and a timer is armed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingSession {
    pub id: String,
    pub payment_id: String,
    pub provider_order_id: String,
    pub start_time: DateTime<Utc>,
    pub last_attempt_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub status: SessionStatus,
    /// Provider state that ended the session. Only set when completed.
    pub final_status: Option<ProviderState>,
    /// Only set when failed.
    pub error: Option<String>,
    /// Most recent attempt error, kept while the session retries.
    pub last_error: Option<String>,
    pub failure_reason: Option<FailureReason>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl PollingSession {
    pub fn new(
        id: String,
        payment_id: String,
        provider_order_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            payment_id,
            provider_order_id,
            start_time: now,
            last_attempt_time: None,
            next_attempt_time: None,
            attempts: 0,
            status: SessionStatus::Active,
            final_status: None,
            error: None,
            last_error: None,
            failure_reason: None,
            ended_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub(crate) fn complete(&mut self, state: ProviderState, now: DateTime<Utc>) {
        self.finish(SessionStatus::Completed, now);
        self.final_status = Some(state);
    }

    pub(crate) fn fail(&mut self, reason: FailureReason, error: String, now: DateTime<Utc>) {
        self.finish(SessionStatus::Failed, now);
        self.failure_reason = Some(reason);
        self.error = Some(error);
    }

    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) {
        self.finish(SessionStatus::Cancelled, now);
    }

    fn finish(&mut self, status: SessionStatus, now: DateTime<Utc>) {
        self.status = status;
        self.next_attempt_time = None;
        self.ended_at = Some(now);
    }

    /// Time from start to end (or to `now` while still active).
    pub fn duration_ms(&self, now: DateTime<Utc>) -> i64 {
        let end = self.ended_at.unwrap_or(now);
        (end - self.start_time).num_milliseconds().max(0)
    }
}
