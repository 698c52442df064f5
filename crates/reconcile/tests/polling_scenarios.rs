//! End-to-end polling scenarios against the in-memory store and feed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;
use stallplass_core::events::{
    decode, ChangeEvent, ChangeFeed, FailingBroadcaster, InMemoryChangeFeed, SubscriptionTopic,
    PAYMENTS_TABLE,
};
use stallplass_core::memory::InMemoryMarketplace;
use stallplass_core::payments::{
    MockPaymentProvider, Payment, PaymentStatus, ProviderError, ProviderState,
};
use stallplass_reconcile::{
    FailureReason, ManualScheduler, PaymentReconciliationEngine, PollingOptions, SessionStatus,
    TokioScheduler,
};

fn pending_payment(id: &str, order: &str) -> Payment {
    Payment::new_pending(id, "rider-1", order, dec!(3900), "NOK", Utc::now())
}

fn fast(max_attempts: u32) -> Option<PollingOptions> {
    Some(PollingOptions {
        interval_ms: Some(10),
        max_attempts: Some(max_attempts),
        ..Default::default()
    })
}

#[tokio::test]
async fn stop_between_attempts_prevents_second_mutation() {
    let provider = Arc::new(MockPaymentProvider::new());
    let store = Arc::new(InMemoryMarketplace::new());
    let feed = Arc::new(InMemoryChangeFeed::new());
    let scheduler = Arc::new(ManualScheduler::new());
    store.insert_payment(pending_payment("p1", "o1"));
    provider.push_state("o1", ProviderState::Created);
    provider.push_state("o1", ProviderState::Authorized);

    let engine = PaymentReconciliationEngine::new(
        provider.clone(),
        store.clone(),
        feed.clone(),
        scheduler.clone(),
    );
    let id = engine.start_polling("p1", "o1", fast(5)).unwrap();

    assert!(scheduler.run_next().await);
    assert_eq!(store.status_update_calls(), 1);
    assert_eq!(scheduler.pending(), 1);

    assert!(engine.stop_polling(&id));
    assert!(!scheduler.run_next().await);

    let session = engine.get_session(&id).unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);
    assert_eq!(session.attempts, 1);
    assert_eq!(store.status_update_calls(), 1);
    assert_eq!(provider.status_calls("o1"), 1);
    assert_eq!(store.payment("p1").unwrap().status, PaymentStatus::Pending);
}

#[tokio::test]
async fn broadcast_failure_does_not_affect_the_session() {
    let provider = Arc::new(MockPaymentProvider::new());
    let store = Arc::new(InMemoryMarketplace::new());
    let broadcaster = Arc::new(FailingBroadcaster::new());
    let scheduler = Arc::new(ManualScheduler::new());
    store.insert_payment(pending_payment("p1", "o1"));
    provider.push_state("o1", ProviderState::Created);
    provider.push_state("o1", ProviderState::Terminated);

    let engine = PaymentReconciliationEngine::new(
        provider,
        store.clone(),
        broadcaster.clone(),
        scheduler.clone(),
    );
    let id = engine.start_polling("p1", "o1", fast(5)).unwrap();
    scheduler.run_until_idle().await;

    let session = engine.get_session(&id).unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.final_status, Some(ProviderState::Terminated));
    assert!(session.last_error.is_none());
    assert_eq!(broadcaster.attempts(), 2);

    let payment = store.payment("p1").unwrap();
    assert_eq!(payment.status, PaymentStatus::Cancelled);
    assert_eq!(
        payment.failure_reason.as_deref(),
        Some("Payment terminated by merchant")
    );
}

#[tokio::test]
async fn independent_sessions_interleave() {
    let provider = Arc::new(MockPaymentProvider::new());
    let store = Arc::new(InMemoryMarketplace::new());
    let feed = Arc::new(InMemoryChangeFeed::new());
    let scheduler = Arc::new(ManualScheduler::new());
    store.insert_payment(pending_payment("p1", "o1"));
    store.insert_payment(pending_payment("p2", "o2"));
    provider.push_state("o1", ProviderState::Authorized);
    provider.push_error("o2", ProviderError::Forbidden("merchant".to_string()));

    let engine =
        PaymentReconciliationEngine::new(provider, store.clone(), feed, scheduler.clone());
    let first = engine.start_polling("p1", "o1", fast(5)).unwrap();
    let second = engine.start_polling("p2", "o2", fast(5)).unwrap();
    assert_eq!(engine.get_active_sessions().len(), 2);

    scheduler.run_until_idle().await;

    assert_eq!(
        engine.get_session(&first).unwrap().status,
        SessionStatus::Completed
    );
    let failed = engine.get_session(&second).unwrap();
    assert_eq!(failed.status, SessionStatus::Failed);
    assert_eq!(failed.failure_reason, Some(FailureReason::CriticalError));

    let stats = engine.get_polling_stats();
    assert_eq!(stats.total_sessions, 2);
    assert_eq!(stats.active_sessions, 0);
    assert_eq!(stats.success_rate, 0.5);
    assert_eq!(stats.average_attempts, 1.0);
}

#[tokio::test]
async fn missing_payment_fails_session_as_critical() {
    let provider = Arc::new(MockPaymentProvider::new());
    let store = Arc::new(InMemoryMarketplace::new());
    let feed = Arc::new(InMemoryChangeFeed::new());
    let scheduler = Arc::new(ManualScheduler::new());
    provider.push_state("ghost", ProviderState::Authorized);

    let engine = PaymentReconciliationEngine::new(provider, store, feed, scheduler.clone());
    let id = engine.start_polling("p-ghost", "ghost", fast(5)).unwrap();
    assert_eq!(scheduler.run_until_idle().await, 1);

    let session = engine.get_session(&id).unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.failure_reason, Some(FailureReason::CriticalError));
}

#[tokio::test]
async fn payment_updates_reach_the_change_feed() {
    let provider = Arc::new(MockPaymentProvider::new());
    let feed = Arc::new(InMemoryChangeFeed::new());
    let store = Arc::new(InMemoryMarketplace::with_change_feed(feed.clone()));
    let scheduler = Arc::new(ManualScheduler::new());
    store.insert_payment(pending_payment("p1", "o1"));
    provider.push_state("o1", ProviderState::Expired);

    let mut payments = feed
        .subscribe(SubscriptionTopic::table(PAYMENTS_TABLE))
        .await
        .unwrap();
    let engine =
        PaymentReconciliationEngine::new(provider, store.clone(), feed.clone(), scheduler.clone());
    engine.start_polling("p1", "o1", fast(5)).unwrap();
    scheduler.run_until_idle().await;

    let message = payments.receiver.recv().await.unwrap();
    match decode(&message).unwrap() {
        Some(ChangeEvent::PaymentChanged {
            payment,
            previous_status,
            ..
        }) => {
            assert_eq!(payment.status, PaymentStatus::Failed);
            assert_eq!(previous_status, Some(PaymentStatus::Pending));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn tokio_scheduler_drives_a_session_to_completion() {
    let provider = Arc::new(MockPaymentProvider::new());
    let store = Arc::new(InMemoryMarketplace::new());
    let feed = Arc::new(InMemoryChangeFeed::new());
    store.insert_payment(pending_payment("p1", "o1"));
    provider.push_state("o1", ProviderState::Created);
    provider.push_state("o1", ProviderState::Authorized);

    let engine = PaymentReconciliationEngine::new(
        provider,
        store.clone(),
        feed,
        Arc::new(TokioScheduler::new()),
    );
    let id = engine.start_polling("p1", "o1", fast(5)).unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    let session = engine.get_session(&id).unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.attempts, 2);
    assert_eq!(store.payment("p1").unwrap().status, PaymentStatus::Processing);
}
