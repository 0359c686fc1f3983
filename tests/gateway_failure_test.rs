mod common;

use common::{Harness, patient, tomorrow, valid_card};
use consult_escrow::application::orchestrator::TransitionOutcome;
use consult_escrow::config::EscrowConfig;
use consult_escrow::domain::instrument::PaymentMethod;
use consult_escrow::domain::payment::{Initiator, PaymentStatus};
use consult_escrow::domain::ports::{GatewayHoldState, PaymentGateway};
use consult_escrow::error::EscrowError;
use consult_escrow::infrastructure::gateway::MockGateway;
use rust_decimal_macros::dec;
use std::time::Duration;

#[tokio::test]
async fn test_gateway_timeout_leaves_record_pending() {
    let config = EscrowConfig {
        gateway_timeout: Duration::from_millis(20),
        ..EscrowConfig::default()
    };
    let harness = Harness::new(MockGateway::new().with_latency(Duration::from_millis(500)), config).await;
    harness.appointment(1, dec!(100.00), tomorrow()).await;
    let intent = harness.orchestrator.create_intent(1, 1).await.unwrap();

    let err = harness
        .orchestrator
        .submit_instrument(intent.payment_id, PaymentMethod::CreditCard, &valid_card(), 1)
        .await
        .unwrap_err();

    assert!(matches!(err, EscrowError::GatewayUnavailable(_)));
    assert_eq!(err.status_code(), 503);
    assert!(err.is_retryable());
    assert_eq!(
        harness.orchestrator.get_status(intent.payment_id).await.unwrap(),
        intent
    );
}

#[tokio::test]
async fn test_gateway_outage_leaves_record_held() {
    let harness = Harness::with_defaults().await;
    harness.appointment(1, dec!(100.00), tomorrow()).await;
    let held = harness.held_payment(1).await;

    harness.gateway.set_unavailable(true);
    let err = harness
        .orchestrator
        .cancel(held.payment_id, patient(), "cannot attend")
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::GatewayUnavailable(_)));
    assert_eq!(
        harness.orchestrator.get_status(held.payment_id).await.unwrap(),
        held
    );

    // Same request succeeds once the processor is back.
    harness.gateway.set_unavailable(false);
    let outcome = harness
        .orchestrator
        .cancel(held.payment_id, patient(), "cannot attend")
        .await
        .unwrap();
    assert_eq!(outcome.record().status(), PaymentStatus::Refunded);
}

#[tokio::test]
async fn test_reconcile_after_lost_release_response() {
    let harness = Harness::with_defaults().await;
    harness.appointment(1, dec!(100.00), tomorrow()).await;
    let held = harness.held_payment(1).await;
    let hold_reference = held.hold_reference.clone().unwrap();

    harness.gateway.set_lose_responses(true);
    let err = harness
        .orchestrator
        .confirm_occurred(held.payment_id, patient())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    harness.gateway.set_lose_responses(false);

    // The processor settled even though we never heard back.
    assert_eq!(
        harness.gateway.query_status(&hold_reference).await.unwrap(),
        GatewayHoldState::Released
    );
    assert_eq!(
        harness
            .orchestrator
            .get_status(held.payment_id)
            .await
            .unwrap()
            .status(),
        PaymentStatus::PaidHeld
    );

    let outcome = harness.orchestrator.reconcile(held.payment_id).await.unwrap();
    assert!(outcome.was_applied());
    let record = outcome.into_record();
    assert_eq!(record.status(), PaymentStatus::Released);
    assert_eq!(record.confirmed_by, Some(Initiator::Reconciliation));
    assert_eq!(record.provider_amount, Some(dec!(100.00)));

    // A cancel now loses against the reconciled release.
    assert!(matches!(
        harness
            .orchestrator
            .cancel(held.payment_id, patient(), "late")
            .await,
        Err(EscrowError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_reconcile_of_untouched_hold_is_a_no_op() {
    let harness = Harness::with_defaults().await;
    harness.appointment(1, dec!(100.00), tomorrow()).await;
    let held = harness.held_payment(1).await;

    let outcome = harness.orchestrator.reconcile(held.payment_id).await.unwrap();
    assert!(matches!(outcome, TransitionOutcome::Unchanged(ref record) if *record == held));
}

#[tokio::test]
async fn test_retry_after_lost_release_response_is_idempotent_at_gateway() {
    let harness = Harness::with_defaults().await;
    harness.appointment(1, dec!(100.00), tomorrow()).await;
    let held = harness.held_payment(1).await;

    harness.gateway.set_lose_responses(true);
    assert!(harness
        .orchestrator
        .confirm_occurred(held.payment_id, patient())
        .await
        .is_err());
    harness.gateway.set_lose_responses(false);

    // Retrying the same confirm is safe: the processor treats the repeat
    // release of a released hold as a no-op.
    let outcome = harness
        .orchestrator
        .confirm_occurred(held.payment_id, patient())
        .await
        .unwrap();
    assert!(outcome.was_applied());
    assert_eq!(harness.gateway.stats().releases, 2);
}

#[tokio::test]
async fn test_held_payment_settles_after_restart() {
    let harness = Harness::new(MockGateway::seeded(1), EscrowConfig::default()).await;
    harness.appointment(1, dec!(100.00), tomorrow()).await;
    harness.appointment(2, dec!(80.00), tomorrow()).await;
    let confirmed = harness.held_payment(1).await;
    let cancelled = harness.held_payment(2).await;

    let restarted = harness.restarted(MockGateway::seeded(2));
    let released = restarted
        .orchestrator
        .confirm_occurred(confirmed.payment_id, patient())
        .await
        .unwrap()
        .into_record();
    assert_eq!(released.status(), PaymentStatus::Released);
    assert_eq!(released.provider_amount, Some(dec!(100.00)));

    let refunded = restarted
        .orchestrator
        .cancel(cancelled.payment_id, patient(), "cannot attend")
        .await
        .unwrap()
        .into_record();
    assert_eq!(refunded.status(), PaymentStatus::Refunded);

    let stats = restarted.gateway.stats();
    assert_eq!((stats.releases, stats.refunds), (1, 1));
}

#[tokio::test]
async fn test_settlement_rejection_is_not_an_instrument_error() {
    let harness = Harness::with_defaults().await;
    harness.appointment(1, dec!(100.00), tomorrow()).await;
    let held = harness.held_payment(1).await;
    let hold_reference = held.hold_reference.clone().unwrap();

    // Voided at the processor behind our back.
    harness
        .gateway
        .refund(&hold_reference, held.total_amount)
        .await
        .unwrap();

    let err = harness
        .orchestrator
        .confirm_occurred(held.payment_id, patient())
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::GatewayRejected(_)));
    assert_eq!(err.code(), "gateway_rejected");
    assert_ne!(err.status_code(), 422);
    assert!(!err.is_retryable());
    assert_eq!(
        harness.orchestrator.get_status(held.payment_id).await.unwrap(),
        held
    );
}
