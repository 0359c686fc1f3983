mod common;

use common::{Harness, patient, tomorrow};
use consult_escrow::domain::payment::PaymentStatus;
use consult_escrow::error::EscrowError;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_auto_release_and_cancel_race() {
    let harness = Harness::new(
        consult_escrow::infrastructure::gateway::MockGateway::new()
            .with_latency(Duration::from_millis(5)),
        Default::default(),
    )
    .await;

    for appointment_id in 1..=20 {
        harness.appointment(appointment_id, dec!(100.00), tomorrow()).await;
        let held = harness.held_payment(appointment_id).await;
        let payment_id = held.payment_id;
        harness.set_now(held.auto_release_deadline.unwrap());

        let sweeper = Arc::clone(&harness.orchestrator);
        let canceller = Arc::clone(&harness.orchestrator);
        let release = tokio::spawn(async move { sweeper.auto_release(payment_id).await });
        let cancel = tokio::spawn(async move {
            canceller
                .cancel(payment_id, patient(), "cannot attend")
                .await
        });
        let (release, cancel) = (release.await.unwrap(), cancel.await.unwrap());

        let final_status = harness
            .orchestrator
            .get_status(payment_id)
            .await
            .unwrap()
            .status();
        match (release, cancel) {
            (Ok(_), Err(EscrowError::InvalidTransition { .. })) => {
                assert_eq!(final_status, PaymentStatus::Released)
            }
            (Err(EscrowError::InvalidTransition { .. }), Ok(_)) => {
                assert_eq!(final_status, PaymentStatus::Refunded)
            }
            other => panic!("expected exactly one winner, got {other:?}"),
        }
    }

    // Every hold was settled exactly once, one way or the other.
    let stats = harness.gateway.stats();
    assert_eq!(stats.releases + stats.refunds, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_confirms_release_once() {
    let harness = Harness::with_defaults().await;
    harness.appointment(1, dec!(100.00), tomorrow()).await;
    let payment_id = harness.held_payment(1).await.payment_id;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let orchestrator = Arc::clone(&harness.orchestrator);
            tokio::spawn(async move { orchestrator.confirm_occurred(payment_id, patient()).await })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.record().status(), PaymentStatus::Released);
        if outcome.was_applied() {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(harness.gateway.stats().releases, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_intents_for_one_appointment() {
    let harness = Harness::with_defaults().await;
    harness.appointment(1, dec!(100.00), tomorrow()).await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let orchestrator = Arc::clone(&harness.orchestrator);
            tokio::spawn(async move { orchestrator.create_intent(1, 1).await })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(EscrowError::DuplicateIntent { appointment_id: 1, .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(created, 1);
}
