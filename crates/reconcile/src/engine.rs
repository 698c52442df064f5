//! Payment reconciliation engine.
//!
//! Each `start_polling` call creates a session that queries the wallet
//! provider on a backoff schedule, writes the observed state to the payment
//! store and optionally broadcasts it, until the provider reports a terminal
//! state, the attempt budget runs out, a critical error occurs or the
//! session is stopped.
//!
//! Attempts of one session are strictly sequential: the next timer is armed
//! only when the current attempt has finished. Every mutation re-checks that
//! the session is still active, so `stop_polling` may race an in-flight
//! attempt safely.

use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::json;
use stallplass_core::events::BroadcastPublisher;
use stallplass_core::payments::{
    Payment, PaymentError, PaymentProviderClient, PaymentRepositoryTrait, PaymentStatus,
    ProviderPaymentStatus, ProviderState, RetryClass,
};

use crate::backoff::next_delay;
use crate::config::{PollingConfig, PollingOptions};
use crate::errors::{ReconcileError, Result};
use crate::registry::{PollingStats, SessionRegistry};
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::session::{FailureReason, PollingSession, MAX_ATTEMPTS_REACHED};

/// Channel every attempt is broadcast on.
pub const BROADCAST_CHANNEL: &str = "payment-polling";

/// Event name of attempt broadcasts.
pub const BROADCAST_EVENT: &str = "payment_status_update";

/// Default retention for ended sessions, in hours.
pub const DEFAULT_RETENTION_HOURS: u32 = 24;

struct EngineInner {
    provider: Arc<dyn PaymentProviderClient>,
    payments: Arc<dyn PaymentRepositoryTrait>,
    broadcaster: Arc<dyn BroadcastPublisher>,
    scheduler: Arc<dyn Scheduler>,
    defaults: PollingConfig,
    registry: SessionRegistry,
}

/// Drives polling sessions. Cloning shares the same sessions.
#[derive(Clone)]
pub struct PaymentReconciliationEngine {
    inner: Arc<EngineInner>,
}

impl PaymentReconciliationEngine {
    pub fn new(
        provider: Arc<dyn PaymentProviderClient>,
        payments: Arc<dyn PaymentRepositoryTrait>,
        broadcaster: Arc<dyn BroadcastPublisher>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self::with_config(
            provider,
            payments,
            broadcaster,
            scheduler,
            PollingConfig::default(),
        )
    }

    /// Creates an engine whose sessions start from `defaults` instead of the
    /// built-in configuration.
    pub fn with_config(
        provider: Arc<dyn PaymentProviderClient>,
        payments: Arc<dyn PaymentRepositoryTrait>,
        broadcaster: Arc<dyn BroadcastPublisher>,
        scheduler: Arc<dyn Scheduler>,
        defaults: PollingConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                provider,
                payments,
                broadcaster,
                scheduler,
                defaults,
                registry: SessionRegistry::new(),
            }),
        }
    }

    pub fn defaults(&self) -> &PollingConfig {
        &self.inner.defaults
    }

    /// Registers an active session and arms its first attempt after
    /// `interval_ms`. Returns the new session id.
    ///
    /// Only an invalid configuration or an empty id is rejected. Whether the
    /// payment exists is found out by the attempts.
    pub fn start_polling(
        &self,
        payment_id: &str,
        provider_order_id: &str,
        options: Option<PollingOptions>,
    ) -> Result<String> {
        if payment_id.trim().is_empty() {
            return Err(ReconcileError::MissingField("payment_id"));
        }
        if provider_order_id.trim().is_empty() {
            return Err(ReconcileError::MissingField("provider_order_id"));
        }

        let config = match &options {
            Some(options) => self.inner.defaults.merged(options),
            None => self.inner.defaults.clone(),
        };
        config.validate()?;

        let session_id = format!("poll_{}", uuid::Uuid::new_v4().simple());
        let session = PollingSession::new(
            session_id.clone(),
            payment_id.to_string(),
            provider_order_id.to_string(),
            self.inner.scheduler.now(),
        );
        let first_delay = next_delay(&config, 0);
        self.inner.registry.insert(session, config);

        info!(
            "Started polling session {} for payment {} (order {})",
            session_id, payment_id, provider_order_id
        );
        self.inner.schedule(&session_id, first_delay);
        Ok(session_id)
    }

    /// Cancels an active session and its pending timer.
    ///
    /// Returns true for any known session, false for unknown ids. Ended
    /// sessions are left untouched.
    pub fn stop_polling(&self, session_id: &str) -> bool {
        let now = self.inner.scheduler.now();
        let outcome = self.inner.registry.with_entry(session_id, |entry| {
            if !entry.session.is_active() {
                return false;
            }
            entry.session.cancel(now);
            if let Some(timer) = entry.timer.take() {
                timer.cancel();
            }
            true
        });

        match outcome {
            Some(true) => {
                info!("Stopped polling session {}", session_id);
                true
            }
            Some(false) => {
                debug!("Session {} already ended, nothing to stop", session_id);
                true
            }
            None => false,
        }
    }

    pub fn get_session(&self, session_id: &str) -> Option<PollingSession> {
        self.inner.registry.get(session_id)
    }

    pub fn get_active_sessions(&self) -> Vec<PollingSession> {
        self.inner.registry.active()
    }

    pub fn get_polling_stats(&self) -> PollingStats {
        self.inner.registry.stats(self.inner.scheduler.now())
    }

    /// Drops ended sessions started more than `max_age_hours` ago. Returns
    /// how many were removed.
    pub fn cleanup(&self, max_age_hours: u32) -> usize {
        let cutoff =
            self.inner.scheduler.now() - chrono::Duration::hours(i64::from(max_age_hours));
        let removed = self.inner.registry.purge_terminal_before(cutoff);
        if removed > 0 {
            info!("Cleaned up {} polling session(s)", removed);
        }
        removed
    }

    /// Captures an authorized payment and marks it completed.
    ///
    /// Capturing an already completed payment returns it unchanged.
    pub async fn capture_payment(&self, payment_id: &str) -> Result<Payment> {
        let payment = self
            .inner
            .payments
            .get_payment(payment_id)?
            .ok_or_else(|| ReconcileError::PaymentNotFound(payment_id.to_string()))?;

        if payment.status == PaymentStatus::Completed {
            debug!("Payment {} already captured", payment_id);
            return Ok(payment);
        }
        if payment.status.is_terminal() {
            return Err(PaymentError::StatusRegression {
                payment_id: payment.id.clone(),
                from: payment.status.to_string(),
                to: PaymentStatus::Completed.to_string(),
            }
            .into());
        }

        let amount = payment.amount_minor();
        if amount <= 0 {
            return Err(PaymentError::NothingToCapture(payment.id.clone()).into());
        }

        let captured = self
            .inner
            .provider
            .capture(&payment.provider_order_id, amount)
            .await?;
        let updated = self
            .inner
            .payments
            .mark_payment_captured(&payment.provider_order_id, captured.captured_amount)
            .await?;
        info!(
            "Captured {} minor units for payment {} (order {})",
            captured.captured_amount, payment_id, payment.provider_order_id
        );
        Ok(updated)
    }
}

/// Timer body for one attempt. Holds the engine weakly so pending timers do
/// not keep a dropped engine alive.
fn attempt_task(engine: Weak<EngineInner>, session_id: String) -> ScheduledTask {
    Box::pin(async move {
        let Some(engine) = engine.upgrade() else {
            return;
        };
        if let Some(delay) = engine.run_attempt(&session_id).await {
            engine.schedule(&session_id, delay);
        }
    })
}

struct AttemptContext {
    payment_id: String,
    provider_order_id: String,
    attempts: u32,
    enable_broadcast: bool,
}

impl EngineInner {
    /// Arms the next attempt, unless the session ended in the meantime.
    fn schedule(self: &Arc<Self>, session_id: &str, delay: Duration) {
        let now = self.scheduler.now();
        let handle = self.scheduler.after(
            delay,
            attempt_task(Arc::downgrade(self), session_id.to_string()),
        );
        let armed = self
            .registry
            .with_entry(session_id, |entry| {
                if !entry.session.is_active() {
                    return false;
                }
                entry.session.next_attempt_time =
                    Some(now + chrono::Duration::milliseconds(delay.as_millis() as i64));
                if let Some(previous) = entry.timer.replace(handle.clone()) {
                    previous.cancel();
                }
                true
            })
            .unwrap_or(false);

        if armed {
            debug!("Session {} next attempt in {:?}", session_id, delay);
        } else {
            handle.cancel();
        }
    }

    /// Runs one attempt. Returns the delay before the next one, or `None`
    /// when the session is no longer active.
    async fn run_attempt(&self, session_id: &str) -> Option<Duration> {
        let now = self.scheduler.now();
        let ctx = self
            .registry
            .with_entry(session_id, |entry| {
                if !entry.session.is_active() {
                    return None;
                }
                entry.session.attempts += 1;
                entry.session.last_attempt_time = Some(now);
                entry.session.next_attempt_time = None;
                entry.timer = None;
                Some(AttemptContext {
                    payment_id: entry.session.payment_id.clone(),
                    provider_order_id: entry.session.provider_order_id.clone(),
                    attempts: entry.session.attempts,
                    enable_broadcast: entry.config.enable_broadcast,
                })
            })
            .flatten()?;

        debug!(
            "Polling attempt {} for session {} (order {})",
            ctx.attempts, session_id, ctx.provider_order_id
        );

        match self.poll_once(session_id, &ctx).await {
            Ok(Some(state)) => self.settle(session_id, state),
            Ok(None) => {
                debug!("Session {} stopped during attempt {}", session_id, ctx.attempts);
                None
            }
            Err(err) => self.settle_error(session_id, err),
        }
    }

    /// Queries the provider and records the result. `Ok(None)` when the
    /// session was stopped before the payment could be written.
    async fn poll_once(
        &self,
        session_id: &str,
        ctx: &AttemptContext,
    ) -> stallplass_core::Result<Option<ProviderState>> {
        let status = self
            .provider
            .check_status(&ctx.provider_order_id)
            .await?;

        if !self.registry.is_active(session_id) {
            return Ok(None);
        }
        let payment = self
            .payments
            .update_payment_status(&ctx.provider_order_id, status.state)
            .await?;

        if ctx.enable_broadcast {
            self.broadcast(session_id, ctx, &status, &payment).await;
        }
        Ok(Some(status.state))
    }

    async fn broadcast(
        &self,
        session_id: &str,
        ctx: &AttemptContext,
        status: &ProviderPaymentStatus,
        payment: &Payment,
    ) {
        let payload = json!({
            "session_id": session_id,
            "payment_id": ctx.payment_id,
            "provider_order_id": ctx.provider_order_id,
            "polling_attempt": ctx.attempts,
            "provider_status": status.state,
            "payment_status": payment.status,
            "amount": payment.amount,
            "actor_id": payment.user_id,
            "timestamp": self.scheduler.now().to_rfc3339(),
            "metadata": {
                "polling_session": session_id,
                "attempts": ctx.attempts,
                "source": "payment_polling",
            },
        });

        if let Err(e) = self
            .broadcaster
            .publish(BROADCAST_CHANNEL, BROADCAST_EVENT, payload)
            .await
        {
            warn!(
                "Broadcast for session {} attempt {} failed: {}",
                session_id, ctx.attempts, e
            );
        }
    }

    fn settle(&self, session_id: &str, state: ProviderState) -> Option<Duration> {
        let now = self.scheduler.now();
        self.registry
            .with_entry(session_id, |entry| {
                if !entry.session.is_active() {
                    return None;
                }
                if state.is_terminal() {
                    entry.session.complete(state, now);
                    info!(
                        "Session {} completed with provider state {} after {} attempt(s)",
                        session_id, state, entry.session.attempts
                    );
                    return None;
                }
                if entry.session.attempts >= entry.config.max_attempts {
                    entry.session.fail(
                        FailureReason::MaxAttemptsReached,
                        MAX_ATTEMPTS_REACHED.to_string(),
                        now,
                    );
                    warn!(
                        "Session {} gave up after {} attempt(s), payment still {}",
                        session_id, entry.session.attempts, state
                    );
                    return None;
                }
                Some(next_delay(&entry.config, entry.session.attempts))
            })
            .flatten()
    }

    fn settle_error(&self, session_id: &str, err: stallplass_core::Error) -> Option<Duration> {
        let now = self.scheduler.now();
        let message = err.to_string();
        let critical = err.retry_class() == RetryClass::Never;

        self.registry
            .with_entry(session_id, |entry| {
                if !entry.session.is_active() {
                    return None;
                }
                entry.session.last_error = Some(message.clone());
                if critical {
                    error!(
                        "Session {} failed on attempt {}: {}",
                        session_id, entry.session.attempts, message
                    );
                    entry
                        .session
                        .fail(FailureReason::CriticalError, message, now);
                    return None;
                }
                if entry.session.attempts >= entry.config.max_attempts {
                    warn!(
                        "Session {} gave up after {} attempt(s), last error: {}",
                        session_id, entry.session.attempts, message
                    );
                    entry.session.fail(
                        FailureReason::MaxAttemptsReached,
                        MAX_ATTEMPTS_REACHED.to_string(),
                        now,
                    );
                    return None;
                }
                warn!(
                    "Session {} attempt {} failed, retrying: {}",
                    session_id, entry.session.attempts, message
                );
                Some(next_delay(&entry.config, entry.session.attempts))
            })
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use crate::session::SessionStatus;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use stallplass_core::events::InMemoryChangeFeed;
    use stallplass_core::memory::InMemoryMarketplace;
    use stallplass_core::payments::{MockPaymentProvider, ProviderError};

    struct Harness {
        engine: PaymentReconciliationEngine,
        provider: Arc<MockPaymentProvider>,
        store: Arc<InMemoryMarketplace>,
        feed: Arc<InMemoryChangeFeed>,
        scheduler: Arc<ManualScheduler>,
    }

    fn harness() -> Harness {
        let provider = Arc::new(MockPaymentProvider::new());
        let store = Arc::new(InMemoryMarketplace::new());
        let feed = Arc::new(InMemoryChangeFeed::new());
        let scheduler = Arc::new(ManualScheduler::new());
        store.insert_payment(Payment::new_pending(
            "p1",
            "rider-1",
            "o1",
            dec!(4500),
            "NOK",
            Utc::now(),
        ));
        let engine = PaymentReconciliationEngine::new(
            provider.clone(),
            store.clone(),
            feed.clone(),
            scheduler.clone(),
        );
        Harness {
            engine,
            provider,
            store,
            feed,
            scheduler,
        }
    }

    fn options(interval_ms: u64, max_attempts: u32) -> Option<PollingOptions> {
        Some(PollingOptions {
            interval_ms: Some(interval_ms),
            max_attempts: Some(max_attempts),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_start_arms_first_attempt_after_interval() {
        let h = harness();
        let id = h.engine.start_polling("p1", "o1", options(250, 5)).unwrap();

        let session = h.engine.get_session(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.attempts, 0);
        assert!(session.next_attempt_time.is_some());
        assert_eq!(h.scheduler.scheduled_delays(), vec![Duration::from_millis(250)]);
        assert_eq!(h.engine.get_active_sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let h = harness();
        let err = h
            .engine
            .start_polling("p1", "o1", options(0, 5))
            .unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidConfig(_)));
        assert!(h.engine.get_active_sessions().is_empty());
        assert_eq!(h.scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_interval_above_backoff_ceiling_is_capped() {
        let h = harness();
        h.provider.push_state("o1", ProviderState::Created);
        let options = Some(PollingOptions {
            interval_ms: Some(40_000),
            max_attempts: Some(2),
            ..Default::default()
        });
        let id = h.engine.start_polling("p1", "o1", options).unwrap();
        assert_eq!(h.scheduler.scheduled_delays(), vec![Duration::from_millis(30_000)]);

        h.scheduler.run_until_idle().await;
        assert_eq!(
            h.scheduler.scheduled_delays(),
            vec![Duration::from_millis(30_000), Duration::from_millis(30_000)]
        );
        assert_eq!(h.engine.get_session(&id).unwrap().status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn test_shrinking_multiplier_is_accepted() {
        let h = harness();
        let options = Some(PollingOptions {
            interval_ms: Some(1_000),
            backoff_multiplier: Some(0.5),
            ..Default::default()
        });
        assert!(h.engine.start_polling("p1", "o1", options).is_ok());
        assert_eq!(h.scheduler.scheduled_delays(), vec![Duration::from_millis(1_000)]);
    }

    #[tokio::test]
    async fn test_created_then_authorized_completes() {
        let h = harness();
        h.provider.push_state("o1", ProviderState::Created);
        h.provider.push_state("o1", ProviderState::Authorized);

        let id = h.engine.start_polling("p1", "o1", options(10, 2)).unwrap();
        assert_eq!(h.scheduler.run_until_idle().await, 2);

        let session = h.engine.get_session(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.final_status, Some(ProviderState::Authorized));
        assert_eq!(session.attempts, 2);
        assert!(session.error.is_none());
        assert!(session.next_attempt_time.is_none());
        assert_eq!(h.store.payment("p1").unwrap().status, PaymentStatus::Processing);
        assert_eq!(h.feed.broadcasts_on(BROADCAST_CHANNEL).len(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_payload_shape() {
        let h = harness();
        h.provider.push_state("o1", ProviderState::Authorized);
        let id = h.engine.start_polling("p1", "o1", options(10, 2)).unwrap();
        h.scheduler.run_until_idle().await;

        let broadcasts = h.feed.broadcasts_on(BROADCAST_CHANNEL);
        let message = &broadcasts[0];
        assert_eq!(message.event, BROADCAST_EVENT);
        let payload = &message.payload;
        assert_eq!(payload["session_id"], id.as_str());
        assert_eq!(payload["payment_id"], "p1");
        assert_eq!(payload["provider_order_id"], "o1");
        assert_eq!(payload["polling_attempt"], 1);
        assert_eq!(payload["provider_status"], "AUTHORIZED");
        assert_eq!(payload["payment_status"], "PROCESSING");
        assert_eq!(payload["actor_id"], "rider-1");
        assert_eq!(payload["metadata"]["source"], "payment_polling");
        assert_eq!(payload["metadata"]["attempts"], 1);
    }

    #[tokio::test]
    async fn test_disabled_broadcast_publishes_nothing() {
        let h = harness();
        h.provider.push_state("o1", ProviderState::Authorized);
        let opts = PollingOptions {
            interval_ms: Some(10),
            enable_broadcast: Some(false),
            ..Default::default()
        };
        h.engine.start_polling("p1", "o1", Some(opts)).unwrap();
        h.scheduler.run_until_idle().await;
        assert!(h.feed.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_fails_without_timer() {
        let h = harness();
        h.provider.push_state("o1", ProviderState::Created);

        let id = h.engine.start_polling("p1", "o1", options(10, 3)).unwrap();
        assert_eq!(h.scheduler.run_until_idle().await, 3);

        let session = h.engine.get_session(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.error.as_deref(), Some(MAX_ATTEMPTS_REACHED));
        assert_eq!(session.failure_reason, Some(FailureReason::MaxAttemptsReached));
        assert_eq!(session.attempts, 3);
        assert!(session.next_attempt_time.is_none());
        assert_eq!(h.scheduler.pending(), 0);
        assert_eq!(h.store.payment("p1").unwrap().status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_unauthorized_fails_on_first_attempt() {
        let h = harness();
        h.provider
            .push_error("o1", ProviderError::Unauthorized("token rejected".to_string()));

        let id = h.engine.start_polling("p1", "o1", options(10, 20)).unwrap();
        assert_eq!(h.scheduler.run_until_idle().await, 1);

        let session = h.engine.get_session(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.attempts, 1);
        assert_eq!(session.failure_reason, Some(FailureReason::CriticalError));
        assert!(session.error.unwrap().to_lowercase().contains("unauthorized"));
        assert_eq!(h.store.status_update_calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_error_retries_with_backoff() {
        let h = harness();
        h.provider
            .push_error("o1", ProviderError::Timeout("check_status".to_string()));
        h.provider.push_state("o1", ProviderState::Aborted);
        let opts = PollingOptions {
            interval_ms: Some(1000),
            backoff_multiplier: Some(2.0),
            max_backoff_ms: Some(5000),
            ..Default::default()
        };

        let id = h.engine.start_polling("p1", "o1", Some(opts)).unwrap();
        h.scheduler.run_until_idle().await;

        let session = h.engine.get_session(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.final_status, Some(ProviderState::Aborted));
        assert!(session.error.is_none());
        assert!(session.last_error.unwrap().contains("timeout"));
        assert_eq!(
            h.scheduler.scheduled_delays(),
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
        assert_eq!(h.store.payment("p1").unwrap().status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_stop_polling_semantics() {
        let h = harness();
        h.provider.push_state("o1", ProviderState::Created);
        let id = h.engine.start_polling("p1", "o1", options(10, 5)).unwrap();

        assert!(h.engine.stop_polling(&id));
        assert!(h.engine.stop_polling(&id));
        assert!(!h.engine.stop_polling("poll_unknown"));

        let session = h.engine.get_session(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Cancelled);
        assert!(session.next_attempt_time.is_none());
        assert_eq!(h.scheduler.run_until_idle().await, 0);
        assert_eq!(h.provider.status_calls("o1"), 0);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_old_terminal_sessions() {
        let h = harness();
        h.provider.push_state("o1", ProviderState::Authorized);
        let done = h.engine.start_polling("p1", "o1", options(10, 2)).unwrap();
        h.scheduler.run_until_idle().await;
        let active = h.engine.start_polling("p1", "o1", options(20_000, 2)).unwrap();

        assert_eq!(h.engine.cleanup(DEFAULT_RETENTION_HOURS), 0);
        h.scheduler.advance_clock(Duration::from_secs(25 * 3600));
        assert_eq!(h.engine.cleanup(DEFAULT_RETENTION_HOURS), 1);

        assert!(h.engine.get_session(&done).is_none());
        assert!(h.engine.get_session(&active).is_some());
    }

    #[tokio::test]
    async fn test_capture_marks_payment_completed() {
        let h = harness();
        h.provider.push_state("o1", ProviderState::Authorized);
        h.engine.start_polling("p1", "o1", options(10, 2)).unwrap();
        h.scheduler.run_until_idle().await;

        let payment = h.engine.capture_payment("p1").await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert!(payment.paid_at.is_some());
        assert_eq!(h.provider.captures(), vec![("o1".to_string(), 450_000)]);

        let again = h.engine.capture_payment("p1").await.unwrap();
        assert_eq!(again.paid_at, payment.paid_at);
        assert_eq!(h.provider.captures().len(), 1);
    }

    #[tokio::test]
    async fn test_capture_unknown_payment() {
        let h = harness();
        let err = h.engine.capture_payment("nope").await.unwrap_err();
        assert!(matches!(err, ReconcileError::PaymentNotFound(_)));
    }
}
