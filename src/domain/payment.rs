use super::appointment::{ActorRole, AppointmentId};
use super::fee::FeeBreakdown;
use super::instrument::PaymentMethod;
use crate::error::{EscrowError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type PaymentId = u64;

/// Escrow lifecycle of a payment record.
///
/// `Released` and `Refunded` are terminal. New states are only ever produced
/// by [`PaymentStatus::next`].
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    PaidHeld,
    Released,
    Refunded,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum TransitionEvent {
    Hold,
    Release,
    Refund,
}

impl PaymentStatus {
    /// The escrow transition table.
    pub fn next(self, event: TransitionEvent) -> Result<PaymentStatus> {
        use PaymentStatus::*;
        use TransitionEvent::*;

        match (self, event) {
            (Pending, Hold) => Ok(PaidHeld),
            (PaidHeld, Release) => Ok(Released),
            (PaidHeld, Refund) => Ok(Refunded),
            (from, event) => Err(EscrowError::InvalidTransition { from, event }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Released | PaymentStatus::Refunded)
    }

    /// The terminal status `event` leads to, if any.
    pub fn outcome_of(event: TransitionEvent) -> Option<PaymentStatus> {
        match event {
            TransitionEvent::Hold => None,
            TransitionEvent::Release => Some(PaymentStatus::Released),
            TransitionEvent::Refund => Some(PaymentStatus::Refunded),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::PaidHeld => "PAID_HELD",
            PaymentStatus::Released => "RELEASED",
            PaymentStatus::Refunded => "REFUNDED",
        };
        f.write_str(name)
    }
}

impl fmt::Display for TransitionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransitionEvent::Hold => "hold",
            TransitionEvent::Release => "release",
            TransitionEvent::Refund => "refund",
        };
        f.write_str(name)
    }
}

/// Who drove a record into its terminal state.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum Initiator {
    Patient,
    Doctor,
    SystemAuto,
    Reconciliation,
}

impl From<ActorRole> for Initiator {
    fn from(role: ActorRole) -> Self {
        match role {
            ActorRole::Patient => Initiator::Patient,
            ActorRole::Doctor => Initiator::Doctor,
            ActorRole::System => Initiator::SystemAuto,
        }
    }
}

/// Everything the ledger needs to open a `PENDING` record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub appointment_id: AppointmentId,
    pub fee: FeeBreakdown,
    pub installments: u32,
    pub client_token: String,
    pub scheduled_at: DateTime<Utc>,
    pub is_mock: bool,
    pub created_at: DateTime<Utc>,
}

/// References returned by the gateway once funds are held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldReceipt {
    pub instrument_token: String,
    pub hold_reference: String,
    pub payment_reference: String,
}

/// The canonical escrow record for one appointment.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentRecord {
    pub payment_id: PaymentId,
    pub appointment_id: AppointmentId,
    pub base_price: Decimal,
    pub platform_fee: Decimal,
    pub total_amount: Decimal,
    pub payment_method: Option<PaymentMethod>,
    pub installments: u32,
    pub instrument_token: Option<String>,
    status: PaymentStatus,
    pub client_token: String,
    pub hold_reference: Option<String>,
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub held_at: Option<DateTime<Utc>>,
    pub scheduled_at: DateTime<Utc>,
    pub auto_release_deadline: Option<DateTime<Utc>>,
    pub is_mock: bool,
    pub released_at: Option<DateTime<Utc>>,
    pub confirmed_by: Option<Initiator>,
    pub provider_amount: Option<Decimal>,
    pub platform_amount: Option<Decimal>,
    pub settlement_reference: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_reference: Option<String>,
    pub cancelled_by: Option<Initiator>,
    pub cancel_reason: Option<String>,
}

impl PaymentRecord {
    /// Opens a record in `PENDING`.
    pub fn pending(payment_id: PaymentId, new: NewPayment) -> Self {
        Self {
            payment_id,
            appointment_id: new.appointment_id,
            base_price: new.fee.base_price,
            platform_fee: new.fee.platform_fee,
            total_amount: new.fee.total_amount,
            payment_method: None,
            installments: new.installments,
            instrument_token: None,
            status: PaymentStatus::Pending,
            client_token: new.client_token,
            hold_reference: None,
            payment_reference: None,
            created_at: new.created_at,
            held_at: None,
            scheduled_at: new.scheduled_at,
            auto_release_deadline: None,
            is_mock: new.is_mock,
            released_at: None,
            confirmed_by: None,
            provider_amount: None,
            platform_amount: None,
            settlement_reference: None,
            refunded_at: None,
            refund_reference: None,
            cancelled_by: None,
            cancel_reason: None,
        }
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn breakdown(&self) -> FeeBreakdown {
        FeeBreakdown {
            base_price: self.base_price,
            platform_fee: self.platform_fee,
            total_amount: self.total_amount,
        }
    }

    /// Whether the automatic release may fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::PaidHeld
            && self.auto_release_deadline.is_some_and(|deadline| deadline <= now)
    }

    /// `PENDING -> PAID_HELD`.
    pub fn hold(
        &mut self,
        method: PaymentMethod,
        installments: u32,
        receipt: HoldReceipt,
        now: DateTime<Utc>,
        confirmation_window: Duration,
    ) -> Result<()> {
        self.status = self.status.next(TransitionEvent::Hold)?;
        self.payment_method = Some(method);
        self.installments = installments;
        self.instrument_token = Some(receipt.instrument_token);
        self.hold_reference = Some(receipt.hold_reference);
        self.payment_reference = Some(receipt.payment_reference);
        self.held_at = Some(now);
        self.auto_release_deadline = Some(self.scheduled_at + confirmation_window);
        Ok(())
    }

    /// `PAID_HELD -> RELEASED`. The provider receives the frozen base price.
    pub fn release(
        &mut self,
        by: Initiator,
        settlement_reference: String,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.status = self.status.next(TransitionEvent::Release)?;
        self.released_at = Some(now);
        self.confirmed_by = Some(by);
        self.provider_amount = Some(self.base_price);
        self.platform_amount = Some(self.platform_fee);
        self.settlement_reference = Some(settlement_reference);
        Ok(())
    }

    /// `PAID_HELD -> REFUNDED`.
    pub fn refund(
        &mut self,
        by: Initiator,
        reason: String,
        refund_reference: String,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.status = self.status.next(TransitionEvent::Refund)?;
        self.refunded_at = Some(now);
        self.cancelled_by = Some(by);
        self.cancel_reason = Some(reason);
        self.refund_reference = Some(refund_reference);
        Ok(())
    }
}
