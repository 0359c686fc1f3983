use chrono::Utc;
use consult_escrow::domain::appointment::{Actor, Appointment};
use consult_escrow::domain::fee::FeeBreakdown;
use consult_escrow::domain::instrument::Instrument;
use consult_escrow::domain::payment::NewPayment;
use consult_escrow::domain::ports::{
    AppointmentDirectoryBox, AuthorizerBox, EscrowAction, HoldRequest, PaymentGatewayBox,
    PaymentLedgerBox,
};
use consult_escrow::infrastructure::gateway::MockGateway;
use consult_escrow::infrastructure::in_memory::{
    InMemoryAppointmentDirectory, InMemoryPaymentLedger, ParticipantAuthorizer,
};
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_ports_as_trait_objects() {
    let ledger: PaymentLedgerBox = Box::new(InMemoryPaymentLedger::new());
    let gateway: PaymentGatewayBox = Box::new(MockGateway::new());
    let authorizer: AuthorizerBox = Box::new(ParticipantAuthorizer::new());
    let directory = InMemoryAppointmentDirectory::new();
    directory
        .insert(Appointment {
            id: 5,
            base_price: dec!(60.00),
            scheduled_at: Utc::now(),
        })
        .await;
    let directory: AppointmentDirectoryBox = Box::new(directory);

    // Verify Send + Sync by spawning tasks
    let ledger_handle = tokio::spawn(async move {
        let record = ledger
            .create(NewPayment {
                appointment_id: 5,
                fee: FeeBreakdown {
                    base_price: dec!(60.00),
                    platform_fee: dec!(12.00),
                    total_amount: dec!(72.00),
                },
                installments: 1,
                client_token: "pi_secret".into(),
                scheduled_at: Utc::now(),
                is_mock: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let allowed = authorizer
            .is_allowed(&Actor::system(), EscrowAction::Confirm, &record)
            .await
            .unwrap();
        (ledger.get(record.payment_id).await.unwrap().unwrap(), allowed)
    });

    let gateway_handle = tokio::spawn(async move {
        gateway
            .authorize_and_hold(HoldRequest {
                payment_id: 1,
                amount: dec!(72.00),
                installments: 1,
                instrument: Instrument::Pix,
                description: "Teleconsultation #5".into(),
            })
            .await
            .unwrap()
    });

    let directory_handle =
        tokio::spawn(async move { directory.get_appointment(5).await.unwrap().unwrap() });

    let (record, allowed) = ledger_handle.await.unwrap();
    assert_eq!(record.appointment_id, 5);
    assert!(allowed);

    let receipt = gateway_handle.await.unwrap();
    assert!(receipt.hold_reference.starts_with("hold_mock_"));

    assert_eq!(directory_handle.await.unwrap().base_price, dec!(60.00));
}
