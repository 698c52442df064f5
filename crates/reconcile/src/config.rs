//! Polling session configuration.

use serde::{Deserialize, Serialize};

use crate::errors::{ReconcileError, Result};

/// Default delay before the first attempt and base of the backoff curve.
pub const DEFAULT_INTERVAL_MS: u64 = 3_000;

/// Default attempt budget per session.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.2;

/// Default ceiling on the delay between two attempts.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

/// Configuration of one polling session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingConfig {
    /// Delay before the first attempt, in milliseconds.
    pub interval_ms: u64,
    /// Attempts before the session gives up.
    pub max_attempts: u32,
    /// Growth factor applied per attempt already made.
    pub backoff_multiplier: f64,
    /// Upper bound on any delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// Publish a broadcast after every attempt.
    pub enable_broadcast: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            enable_broadcast: true,
        }
    }
}

impl PollingConfig {
    /// Applies per-call overrides on top of this configuration.
    pub fn merged(&self, options: &PollingOptions) -> Self {
        Self {
            interval_ms: options.interval_ms.unwrap_or(self.interval_ms),
            max_attempts: options.max_attempts.unwrap_or(self.max_attempts),
            backoff_multiplier: options
                .backoff_multiplier
                .unwrap_or(self.backoff_multiplier),
            max_backoff_ms: options.max_backoff_ms.unwrap_or(self.max_backoff_ms),
            enable_broadcast: options.enable_broadcast.unwrap_or(self.enable_broadcast),
        }
    }

    /// Rejects values that would stall or spin a session. Delays above
    /// `max_backoff_ms` and shrinking multipliers are accepted; the backoff
    /// curve caps them.
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(ReconcileError::InvalidConfig(
                "intervalMs must be greater than zero".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ReconcileError::InvalidConfig(
                "maxAttempts must be at least 1".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 0.0 {
            return Err(ReconcileError::InvalidConfig(format!(
                "backoffMultiplier must be a finite number above zero, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_backoff_ms == 0 {
            return Err(ReconcileError::InvalidConfig(
                "maxBackoffMs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial configuration passed to `start_polling`. Unset fields keep the
/// engine's defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingOptions {
    pub interval_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub backoff_multiplier: Option<f64>,
    pub max_backoff_ms: Option<u64>,
    pub enable_broadcast: Option<bool>,
}
