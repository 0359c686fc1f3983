#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use consult_escrow::application::orchestrator::PaymentOrchestrator;
use consult_escrow::config::EscrowConfig;
use consult_escrow::domain::appointment::{Actor, ActorRole, Appointment};
use consult_escrow::domain::instrument::{InstrumentDetails, PaymentMethod};
use consult_escrow::domain::payment::PaymentRecord;
use consult_escrow::domain::ports::Clock;
use consult_escrow::infrastructure::gateway::MockGateway;
use consult_escrow::infrastructure::in_memory::{
    InMemoryAppointmentDirectory, InMemoryPaymentLedger, ParticipantAuthorizer, Participants,
};
use rust_decimal::Decimal;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const PATIENT: u64 = 10;
pub const DOCTOR: u64 = 20;

/// A clock that only moves when told to.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

pub struct Harness {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub gateway: Arc<MockGateway>,
    pub clock: Arc<ManualClock>,
    pub ledger: InMemoryPaymentLedger,
    pub directory: InMemoryAppointmentDirectory,
    pub authorizer: ParticipantAuthorizer,
    config: EscrowConfig,
}

impl Harness {
    pub async fn new(gateway: MockGateway, config: EscrowConfig) -> Self {
        Self::assemble(
            gateway,
            config,
            Arc::new(ManualClock::new(Utc::now())),
            InMemoryPaymentLedger::new(),
            InMemoryAppointmentDirectory::new(),
            ParticipantAuthorizer::new(),
        )
    }

    fn assemble(
        gateway: MockGateway,
        config: EscrowConfig,
        clock: Arc<ManualClock>,
        ledger: InMemoryPaymentLedger,
        directory: InMemoryAppointmentDirectory,
        authorizer: ParticipantAuthorizer,
    ) -> Self {
        let gateway = Arc::new(gateway);
        let orchestrator = PaymentOrchestrator::new(
            Box::new(ledger.clone()),
            Box::new(directory.clone()),
            Box::new(authorizer.clone()),
            Box::new(Arc::clone(&gateway)),
            config.clone(),
        )
        .with_clock(Box::new(Arc::clone(&clock)));
        Self {
            orchestrator: Arc::new(orchestrator),
            gateway,
            clock,
            ledger,
            directory,
            authorizer,
            config,
        }
    }

    /// A new orchestrator and a fresh mock gateway over the same stored
    /// records, as after a process restart.
    pub fn restarted(&self, gateway: MockGateway) -> Self {
        Self::assemble(
            gateway,
            self.config.clone(),
            Arc::clone(&self.clock),
            self.ledger.clone(),
            self.directory.clone(),
            self.authorizer.clone(),
        )
    }

    /// Moves the orchestrator's clock to `now`.
    pub fn set_now(&self, now: DateTime<Utc>) {
        self.clock.set(now);
    }

    pub async fn with_defaults() -> Self {
        Self::new(MockGateway::seeded(42), EscrowConfig::default()).await
    }

    /// Registers an appointment between [`PATIENT`] and [`DOCTOR`].
    pub async fn appointment(&self, id: u64, base_price: Decimal, scheduled_at: DateTime<Utc>) {
        self.directory
            .insert(Appointment {
                id,
                base_price,
                scheduled_at,
            })
            .await;
        self.authorizer
            .register(
                id,
                Participants {
                    patient_id: PATIENT,
                    doctor_id: DOCTOR,
                },
            )
            .await;
    }

    /// Creates an intent and holds it with PIX.
    pub async fn held_payment(&self, appointment_id: u64) -> PaymentRecord {
        let intent = self.orchestrator.create_intent(appointment_id, 1).await.unwrap();
        self.orchestrator
            .submit_instrument(intent.payment_id, PaymentMethod::Pix, &InstrumentDetails::default(), 1)
            .await
            .unwrap()
    }
}

pub fn patient() -> Actor {
    Actor::new(PATIENT, ActorRole::Patient)
}

pub fn doctor() -> Actor {
    Actor::new(DOCTOR, ActorRole::Doctor)
}

pub fn tomorrow() -> DateTime<Utc> {
    Utc::now() + Duration::days(1)
}

pub fn valid_card() -> InstrumentDetails {
    InstrumentDetails {
        card_number: Some("4111 1111 1111 1111".into()),
        card_name: Some("Ana Souza".into()),
        card_expiry: Some("12/2099".into()),
        card_cvv: Some("123".into()),
    }
}

pub fn write_appointments(path: &Path, rows: &[(u64, &str, &str)]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "id,base_price,scheduled_at,patient_id,doctor_id")?;
    for (id, price, scheduled_at) in rows {
        writeln!(file, "{id},{price},{scheduled_at},{PATIENT},{DOCTOR}")?;
    }
    Ok(())
}
