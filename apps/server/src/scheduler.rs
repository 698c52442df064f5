//! Background jobs for the server.
//!
//! Sweeps ended polling sessions and sends renters their "ending soon"
//! reminders.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stallplass_realtime::NotificationDistributor;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::main_lib::AppState;

/// Ending-soon check interval: 1 hour.
const ENDING_SOON_INTERVAL_SECS: u64 = 60 * 60;

/// Initial delay before the first run, to let the server fully start.
const INITIAL_DELAY_SECS: u64 = 60;

/// Starts the periodic cleanup of ended polling sessions.
pub fn start_session_cleanup_scheduler(state: Arc<AppState>, every: Duration) {
    tokio::spawn(async move {
        info!(
            "Session cleanup scheduler started ({}s interval, {}h retention)",
            every.as_secs(),
            state.session_retention_hours
        );

        tokio::time::sleep(Duration::from_secs(INITIAL_DELAY_SECS)).await;
        let mut ticker = interval(every);

        loop {
            ticker.tick().await;
            let removed = state.engine.cleanup(state.session_retention_hours);
            debug!("Session cleanup removed {} session(s)", removed);
        }
    });
}

/// Starts the hourly ending-soon check for every known renter.
pub fn start_ending_soon_scheduler(state: Arc<AppState>) {
    tokio::spawn(async move {
        info!("Ending-soon scheduler started (1-hour interval)");

        tokio::time::sleep(Duration::from_secs(INITIAL_DELAY_SECS)).await;
        let mut ticker = interval(Duration::from_secs(ENDING_SOON_INTERVAL_SECS));

        loop {
            ticker.tick().await;
            run_ending_soon_check(&state).await;
        }
    });
}

async fn run_ending_soon_check(state: &Arc<AppState>) {
    let today = Utc::now().date_naive();
    let mut reminded = 0;
    for renter in state.distributors.renters().await {
        match renter.check_ending_soon(today) {
            Ok(count) => reminded += count,
            Err(e) => warn!("Ending-soon check for {} failed: {}", renter.actor_id(), e),
        }
    }
    if reminded > 0 {
        info!("Sent {} ending-soon reminder(s)", reminded);
    }
}
