//! In-flight polling sessions and their timers.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::PollingConfig;
use crate::scheduler::CancelHandle;
use crate::session::{PollingSession, SessionStatus};

/// Aggregate counters over the sessions currently held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub completed_sessions: usize,
    pub failed_sessions: usize,
    pub cancelled_sessions: usize,
    /// `completed / (completed + failed)`; zero when neither exists.
    pub success_rate: f64,
    pub average_attempts: f64,
    /// Mean duration of sessions that have ended.
    pub average_duration_ms: f64,
    pub last_updated: DateTime<Utc>,
}

pub(crate) struct SessionEntry {
    pub session: PollingSession,
    pub config: PollingConfig,
    pub timer: Option<CancelHandle>,
}

/// Thread-safe session table.
///
/// Every read returns a snapshot. Callers mutate through closures that run
/// under the lock, so a check and the write that depends on it are atomic.
#[derive(Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("Session registry mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub(crate) fn insert(&self, session: PollingSession, config: PollingConfig) {
        self.lock().insert(
            session.id.clone(),
            SessionEntry {
                session,
                config,
                timer: None,
            },
        );
    }

    /// Runs `f` on the entry under the lock. `None` when the id is unknown.
    pub(crate) fn with_entry<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionEntry) -> R,
    ) -> Option<R> {
        self.lock().get_mut(session_id).map(f)
    }

    pub fn get(&self, session_id: &str) -> Option<PollingSession> {
        self.lock().get(session_id).map(|e| e.session.clone())
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.lock()
            .get(session_id)
            .is_some_and(|e| e.session.is_active())
    }

    pub fn active(&self) -> Vec<PollingSession> {
        let mut sessions: Vec<PollingSession> = self
            .lock()
            .values()
            .filter(|e| e.session.is_active())
            .map(|e| e.session.clone())
            .collect();
        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        sessions
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops terminal sessions started before `cutoff` and cancels any timer
    /// they still hold. Returns how many were removed.
    pub fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| {
            let expired = entry.session.status.is_terminal() && entry.session.start_time < cutoff;
            if expired {
                if let Some(timer) = entry.timer.take() {
                    timer.cancel();
                }
            }
            !expired
        });
        before - entries.len()
    }

    pub fn stats(&self, now: DateTime<Utc>) -> PollingStats {
        let entries = self.lock();
        let count = |status: SessionStatus| {
            entries
                .values()
                .filter(|e| e.session.status == status)
                .count()
        };
        let total = entries.len();
        let completed = count(SessionStatus::Completed);
        let failed = count(SessionStatus::Failed);

        let success_rate = if completed + failed == 0 {
            0.0
        } else {
            completed as f64 / (completed + failed) as f64
        };
        let average_attempts = if total == 0 {
            0.0
        } else {
            entries
                .values()
                .map(|e| e.session.attempts as f64)
                .sum::<f64>()
                / total as f64
        };
        let ended: Vec<i64> = entries
            .values()
            .filter(|e| e.session.status.is_terminal())
            .map(|e| e.session.duration_ms(now))
            .collect();
        let average_duration_ms = if ended.is_empty() {
            0.0
        } else {
            ended.iter().sum::<i64>() as f64 / ended.len() as f64
        };

        PollingStats {
            total_sessions: total,
            active_sessions: count(SessionStatus::Active),
            completed_sessions: completed,
            failed_sessions: failed,
            cancelled_sessions: count(SessionStatus::Cancelled),
            success_rate,
            average_attempts,
            average_duration_ms,
            last_updated: now,
        }
    }
}
