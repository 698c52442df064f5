//! One-shot timers behind a trait.
//!
//! The engine arms one timer per active session through [`Scheduler`].
//! [`TokioScheduler`] runs on the tokio runtime; [`ManualScheduler`] keeps a
//! virtual clock that tests advance by hand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use log::warn;
use tokio::task::AbortHandle;

/// Work to run when a timer fires.
pub type ScheduledTask = BoxFuture<'static, ()>;

pub trait Scheduler: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Runs `task` once after `delay`, unless the returned handle is
    /// cancelled first.
    fn after(&self, delay: Duration, task: ScheduledTask) -> CancelHandle;
}

/// Handle to a pending timer.
///
/// Cancelling before the timer fires drops the task. Cancelling after it
/// started has no effect on the running task.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    started: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if !self.started.load(Ordering::SeqCst) {
            if let Some(abort) = &self.abort {
                abort.abort();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Marks the timer as fired. Returns false if it was cancelled.
    fn begin(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.started.store(true, Ordering::SeqCst);
        true
    }
}

/// Timers on the tokio runtime. Must be used from within a runtime.
#[derive(Clone, Debug, Default)]
pub struct TokioScheduler;

impl TokioScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn after(&self, delay: Duration, task: ScheduledTask) -> CancelHandle {
        let handle = CancelHandle::new();
        let guard = handle.clone();
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if guard.begin() {
                task.await;
            }
        });
        handle.with_abort(join.abort_handle())
    }
}

struct PendingTimer {
    due: DateTime<Utc>,
    seq: u64,
    handle: CancelHandle,
    task: ScheduledTask,
}

struct ManualState {
    now: DateTime<Utc>,
    seq: u64,
    pending: Vec<PendingTimer>,
    history: Vec<Duration>,
}

/// Virtual-time scheduler for tests.
///
/// Nothing runs until the test calls [`run_next`](Self::run_next),
/// [`advance`](Self::advance) or [`run_until_idle`](Self::run_until_idle).
/// Running a timer moves the clock to its due time. Timers due at the same
/// instant run in the order they were armed.
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

/// Upper bound on timers run by a single `run_until_idle` call.
const MAX_IDLE_RUNS: usize = 10_000;

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now,
                seq: 0,
                pending: Vec::new(),
                history: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Manual scheduler mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Timers armed and not cancelled.
    pub fn pending(&self) -> usize {
        self.lock()
            .pending
            .iter()
            .filter(|t| !t.handle.is_cancelled())
            .count()
    }

    /// Every delay passed to `after`, in call order.
    pub fn scheduled_delays(&self) -> Vec<Duration> {
        self.lock().history.clone()
    }

    /// Moves the clock without running anything.
    pub fn advance_clock(&self, by: Duration) {
        let mut state = self.lock();
        state.now += to_chrono(by);
    }

    /// Removes the next timer due at or before `limit` (or the earliest
    /// one when `limit` is `None`) and moves the clock to its due time.
    fn take_next(&self, limit: Option<DateTime<Utc>>) -> Option<(CancelHandle, ScheduledTask)> {
        let mut state = self.lock();
        state.pending.retain(|t| !t.handle.is_cancelled());
        let index = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, t)| limit.map_or(true, |limit| t.due <= limit))
            .min_by_key(|(_, t)| (t.due, t.seq))
            .map(|(i, _)| i)?;
        let timer = state.pending.remove(index);
        if timer.due > state.now {
            state.now = timer.due;
        }
        Some((timer.handle, timer.task))
    }

    async fn run(handle: CancelHandle, task: ScheduledTask) -> bool {
        if !handle.begin() {
            return false;
        }
        task.await;
        true
    }

    /// Runs the earliest pending timer. Returns false when none is left.
    pub async fn run_next(&self) -> bool {
        while let Some((handle, task)) = self.take_next(None) {
            if Self::run(handle, task).await {
                return true;
            }
        }
        false
    }

    /// Runs timers until none is pending, including ones armed along the
    /// way. Returns how many ran.
    pub async fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while ran < MAX_IDLE_RUNS && self.run_next().await {
            ran += 1;
        }
        ran
    }

    /// Advances the clock by `by`, running every timer that falls due on the
    /// way in due order. Returns how many ran.
    pub async fn advance(&self, by: Duration) -> usize {
        let target = self.lock().now + to_chrono(by);
        let mut ran = 0;
        while let Some((handle, task)) = self.take_next(Some(target)) {
            if Self::run(handle, task).await {
                ran += 1;
            }
        }
        let mut state = self.lock();
        if state.now < target {
            state.now = target;
        }
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    fn after(&self, delay: Duration, task: ScheduledTask) -> CancelHandle {
        let handle = CancelHandle::new();
        let mut state = self.lock();
        state.seq += 1;
        let timer = PendingTimer {
            due: state.now + to_chrono(delay),
            seq: state.seq,
            handle: handle.clone(),
            task,
        };
        state.pending.push(timer);
        state.history.push(delay);
        handle
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}
