use crate::domain::appointment::{Actor, ActorId, ActorRole, Appointment, AppointmentId};
use crate::domain::payment::{NewPayment, PaymentId, PaymentRecord, PaymentStatus};
use crate::domain::ports::{
    AppointmentDirectory, Authorizer, EscrowAction, PaymentLedger, SwapOutcome,
};
use crate::error::{EscrowError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct LedgerState {
    records: HashMap<PaymentId, PaymentRecord>,
    /// Appointment -> its non-terminal payment.
    active: HashMap<AppointmentId, PaymentId>,
    last_id: PaymentId,
}

/// A thread-safe in-memory payment ledger.
///
/// Every mutation happens under a single write lock, which makes
/// `create` and `compare_and_swap` atomic with respect to each other.
#[derive(Default, Clone)]
pub struct InMemoryPaymentLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryPaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentLedger for InMemoryPaymentLedger {
    async fn create(&self, new: NewPayment) -> Result<PaymentRecord> {
        let mut state = self.state.write().await;

        if let Some(&existing) = state.active.get(&new.appointment_id) {
            return Err(EscrowError::DuplicateIntent {
                appointment_id: new.appointment_id,
                payment_id: existing,
            });
        }

        state.last_id += 1;
        let record = PaymentRecord::pending(state.last_id, new);
        state.active.insert(record.appointment_id, record.payment_id);
        state.records.insert(record.payment_id, record.clone());
        Ok(record)
    }

    async fn get(&self, payment_id: PaymentId) -> Result<Option<PaymentRecord>> {
        let state = self.state.read().await;
        Ok(state.records.get(&payment_id).cloned())
    }

    async fn find_active(&self, appointment_id: AppointmentId) -> Result<Option<PaymentRecord>> {
        let state = self.state.read().await;
        Ok(state
            .active
            .get(&appointment_id)
            .and_then(|id| state.records.get(id))
            .cloned())
    }

    async fn compare_and_swap(
        &self,
        expected: PaymentStatus,
        updated: PaymentRecord,
    ) -> Result<SwapOutcome> {
        let mut state = self.state.write().await;

        let current = state
            .records
            .get(&updated.payment_id)
            .ok_or(EscrowError::PaymentNotFound(updated.payment_id))?;
        if current.status() != expected {
            return Ok(SwapOutcome::Conflict(current.clone()));
        }

        if updated.status().is_terminal() {
            state.active.remove(&updated.appointment_id);
        }
        state.records.insert(updated.payment_id, updated.clone());
        Ok(SwapOutcome::Swapped(updated))
    }

    async fn due_for_release(&self, now: DateTime<Utc>) -> Result<Vec<PaymentRecord>> {
        let state = self.state.read().await;
        let mut due: Vec<PaymentRecord> = state
            .records
            .values()
            .filter(|record| record.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|record| (record.auto_release_deadline, record.payment_id));
        Ok(due)
    }
}

/// Appointments known to this process, keyed by id.
#[derive(Default, Clone)]
pub struct InMemoryAppointmentDirectory {
    appointments: Arc<RwLock<HashMap<AppointmentId, Appointment>>>,
}

impl InMemoryAppointmentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, appointment: Appointment) {
        let mut appointments = self.appointments.write().await;
        appointments.insert(appointment.id, appointment);
    }
}

#[async_trait]
impl AppointmentDirectory for InMemoryAppointmentDirectory {
    async fn get_appointment(&self, id: AppointmentId) -> Result<Option<Appointment>> {
        let appointments = self.appointments.read().await;
        Ok(appointments.get(&id).cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participants {
    pub patient_id: ActorId,
    pub doctor_id: ActorId,
}

/// Grants escrow actions to the people taking part in an appointment.
///
/// The patient may confirm or cancel, the doctor may only cancel, and the
/// system actor may do either.
#[derive(Default, Clone)]
pub struct ParticipantAuthorizer {
    participants: Arc<RwLock<HashMap<AppointmentId, Participants>>>,
}

impl ParticipantAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, appointment_id: AppointmentId, participants: Participants) {
        let mut map = self.participants.write().await;
        map.insert(appointment_id, participants);
    }
}

#[async_trait]
impl Authorizer for ParticipantAuthorizer {
    async fn is_allowed(
        &self,
        actor: &Actor,
        action: EscrowAction,
        record: &PaymentRecord,
    ) -> Result<bool> {
        if actor.role == ActorRole::System {
            return Ok(true);
        }

        let map = self.participants.read().await;
        let Some(participants) = map.get(&record.appointment_id) else {
            return Ok(false);
        };

        Ok(match (actor.role, action) {
            (ActorRole::Patient, _) => actor.id == participants.patient_id,
            (ActorRole::Doctor, EscrowAction::Cancel) => actor.id == participants.doctor_id,
            (ActorRole::Doctor, EscrowAction::Confirm) => false,
            (ActorRole::System, _) => true,
        })
    }
}
