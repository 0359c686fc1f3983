use super::appointment::{Actor, Appointment, AppointmentId};
use super::instrument::Instrument;
use super::payment::{HoldReceipt, NewPayment, PaymentId, PaymentRecord, PaymentStatus};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of a compare-and-swap against the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum SwapOutcome {
    /// The record was in the expected status and has been replaced.
    Swapped(PaymentRecord),
    /// The stored record no longer matched; it is returned untouched.
    Conflict(PaymentRecord),
}

/// The single owner of payment records.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Assigns an id and stores a `PENDING` record, failing with
    /// `DuplicateIntent` if the appointment already has a non-terminal record.
    async fn create(&self, new: NewPayment) -> Result<PaymentRecord>;
    async fn get(&self, payment_id: PaymentId) -> Result<Option<PaymentRecord>>;
    async fn find_active(&self, appointment_id: AppointmentId) -> Result<Option<PaymentRecord>>;
    /// Atomically replaces the record if its stored status equals `expected`.
    async fn compare_and_swap(
        &self,
        expected: PaymentStatus,
        updated: PaymentRecord,
    ) -> Result<SwapOutcome>;
    /// Held records whose auto-release deadline is at or before `now`.
    async fn due_for_release(&self, now: DateTime<Utc>) -> Result<Vec<PaymentRecord>>;
}

/// Read-only boundary to the scheduling subsystem.
#[async_trait]
pub trait AppointmentDirectory: Send + Sync {
    async fn get_appointment(&self, id: AppointmentId) -> Result<Option<Appointment>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowAction {
    Confirm,
    Cancel,
}

impl EscrowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowAction::Confirm => "confirm",
            EscrowAction::Cancel => "cancel",
        }
    }
}

/// Capability check supplied by the membership subsystem.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn is_allowed(
        &self,
        actor: &Actor,
        action: EscrowAction,
        record: &PaymentRecord,
    ) -> Result<bool>;
}

/// Funds movement requested from the processor.
#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub payment_id: PaymentId,
    pub amount: Decimal,
    pub installments: u32,
    pub instrument: Instrument,
    pub description: String,
}

/// Settlement split sent along with a release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementSplit {
    pub provider_amount: Decimal,
    pub platform_amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayHoldState {
    Held,
    Released,
    Refunded,
    Unknown,
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Boundary to the external payment processor.
///
/// Implementations are chosen at construction; the orchestrator never
/// branches on which one is active beyond copying [`is_mock`](Self::is_mock)
/// into new records.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize_and_hold(&self, request: HoldRequest) -> GatewayResult<HoldReceipt>;
    /// Settles a hold. Returns the settlement reference.
    async fn confirm_release(
        &self,
        hold_reference: &str,
        amount: Decimal,
        split: SettlementSplit,
    ) -> GatewayResult<String>;
    /// Voids a hold. Returns the refund reference.
    async fn refund(&self, hold_reference: &str, amount: Decimal) -> GatewayResult<String>;
    async fn query_status(&self, hold_reference: &str) -> GatewayResult<GatewayHoldState>;
    fn is_mock(&self) -> bool;
}

#[async_trait]
impl<G: PaymentGateway + ?Sized> PaymentGateway for Arc<G> {
    async fn authorize_and_hold(&self, request: HoldRequest) -> GatewayResult<HoldReceipt> {
        (**self).authorize_and_hold(request).await
    }

    async fn confirm_release(
        &self,
        hold_reference: &str,
        amount: Decimal,
        split: SettlementSplit,
    ) -> GatewayResult<String> {
        (**self).confirm_release(hold_reference, amount, split).await
    }

    async fn refund(&self, hold_reference: &str, amount: Decimal) -> GatewayResult<String> {
        (**self).refund(hold_reference, amount).await
    }

    async fn query_status(&self, hold_reference: &str) -> GatewayResult<GatewayHoldState> {
        (**self).query_status(hold_reference).await
    }

    fn is_mock(&self) -> bool {
        (**self).is_mock()
    }
}

/// Source of the current time, injected so deadlines are testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

pub type PaymentLedgerBox = Box<dyn PaymentLedger>;
pub type AppointmentDirectoryBox = Box<dyn AppointmentDirectory>;
pub type AuthorizerBox = Box<dyn Authorizer>;
pub type PaymentGatewayBox = Box<dyn PaymentGateway>;
pub type ClockBox = Box<dyn Clock>;
