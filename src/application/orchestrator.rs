use crate::config::EscrowConfig;
use crate::domain::appointment::{Actor, AppointmentId};
use crate::domain::instrument::{self, FieldError, InstrumentDetails, PaymentMethod};
use crate::domain::payment::{
    Initiator, NewPayment, PaymentId, PaymentRecord, PaymentStatus, TransitionEvent,
};
use crate::domain::ports::{
    AppointmentDirectoryBox, AuthorizerBox, ClockBox, EscrowAction, GatewayHoldState,
    GatewayResult, HoldRequest, PaymentGatewayBox, PaymentLedgerBox, SettlementSplit, SwapOutcome,
    SystemClock,
};
use crate::error::{EscrowError, Result};
use crate::infrastructure::gateway::reference;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

/// What a state-changing request did to the record.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The transition was committed by this call.
    Applied(PaymentRecord),
    /// The record was already in the requested terminal state; the gateway
    /// was not contacted.
    AlreadyDone(PaymentRecord),
    /// Nothing needed to change.
    Unchanged(PaymentRecord),
}

impl TransitionOutcome {
    pub fn record(&self) -> &PaymentRecord {
        match self {
            TransitionOutcome::Applied(record)
            | TransitionOutcome::AlreadyDone(record)
            | TransitionOutcome::Unchanged(record) => record,
        }
    }

    pub fn into_record(self) -> PaymentRecord {
        match self {
            TransitionOutcome::Applied(record)
            | TransitionOutcome::AlreadyDone(record)
            | TransitionOutcome::Unchanged(record) => record,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// A record the sweep could not release.
#[derive(Debug)]
pub struct SweepFailure {
    pub payment_id: PaymentId,
    pub error: EscrowError,
}

/// Result of one [`PaymentOrchestrator::release_due`] pass.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub released: Vec<PaymentId>,
    pub failed: Vec<SweepFailure>,
}

/// Drives payments through the escrow lifecycle.
///
/// Every state change follows the same sequence: check the transition table,
/// call the gateway, then commit through the ledger's compare-and-swap.
/// Requests on the same payment are serialized by a per-payment lock, so the
/// gateway is never asked to settle and void the same hold concurrently.
pub struct PaymentOrchestrator {
    ledger: PaymentLedgerBox,
    appointments: AppointmentDirectoryBox,
    authorizer: AuthorizerBox,
    gateway: PaymentGatewayBox,
    clock: ClockBox,
    config: EscrowConfig,
    locks: DashMap<PaymentId, Arc<Mutex<()>>>,
}

impl PaymentOrchestrator {
    pub fn new(
        ledger: PaymentLedgerBox,
        appointments: AppointmentDirectoryBox,
        authorizer: AuthorizerBox,
        gateway: PaymentGatewayBox,
        config: EscrowConfig,
    ) -> Self {
        Self {
            ledger,
            appointments,
            authorizer,
            gateway,
            clock: Box::new(SystemClock),
            config,
            locks: DashMap::new(),
        }
    }

    /// Replaces the wall clock, mainly for tests.
    pub fn with_clock(mut self, clock: ClockBox) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Opens a `PENDING` record for an appointment with the fee frozen at the
    /// provider's current price.
    ///
    /// The method is not known yet, so `installments` is only checked against
    /// the card limit of 12. A later PIX or debit submission with more than one
    /// installment fails on the `installments` field.
    pub async fn create_intent(
        &self,
        appointment_id: AppointmentId,
        installments: u32,
    ) -> Result<PaymentRecord> {
        if let Some(err) = instrument::check_installments(None, installments) {
            return Err(EscrowError::InvalidInstrument(vec![err]));
        }

        let appointment = self
            .appointments
            .get_appointment(appointment_id)
            .await?
            .ok_or(EscrowError::AppointmentNotFound(appointment_id))?;
        let fee = self.config.fee_policy.compute_total(appointment.base_price)?;

        let is_mock = self.gateway.is_mock();
        let prefix = if is_mock { "pi_mock" } else { "pi" };
        let client_token = format!("{}_secret", reference(prefix, &mut rand::thread_rng()));

        let record = self
            .ledger
            .create(NewPayment {
                appointment_id,
                fee,
                installments,
                client_token,
                scheduled_at: appointment.scheduled_at,
                is_mock,
                created_at: self.clock.now(),
            })
            .await?;

        info!(
            payment_id = record.payment_id,
            appointment_id,
            total = %record.total_amount,
            "payment intent created"
        );
        Ok(record)
    }

    /// Validates the instrument locally and asks the gateway to hold the total.
    pub async fn submit_instrument(
        &self,
        payment_id: PaymentId,
        method: PaymentMethod,
        details: &InstrumentDetails,
        installments: u32,
    ) -> Result<PaymentRecord> {
        let _lock = self.lock(payment_id).await;

        let record = self.load(payment_id).await?;
        record.status().next(TransitionEvent::Hold)?;

        let now = self.clock.now();
        let instrument = instrument::validate(method, details, installments, now).inspect_err(|e| {
            debug!(payment_id, error = %e, "instrument failed local validation");
        })?;

        let request = HoldRequest {
            payment_id,
            amount: record.total_amount,
            installments,
            instrument,
            description: format!("Teleconsultation #{}", record.appointment_id),
        };
        let receipt = self
            .call_gateway("authorize_and_hold", payment_id, self.gateway.authorize_and_hold(request))
            .await
            .map_err(|err| match err {
                EscrowError::GatewayRejected(reason) => {
                    EscrowError::InvalidInstrument(vec![FieldError::new("instrument", reason)])
                }
                other => other,
            })?;

        let mut updated = record;
        updated.hold(method, installments, receipt, now, self.config.confirmation_window)?;
        let record = self
            .commit(PaymentStatus::Pending, updated, TransitionEvent::Hold)
            .await?;

        info!(
            payment_id,
            %method,
            hold = record.hold_reference.as_deref().unwrap_or_default(),
            "funds held"
        );
        Ok(record)
    }

    /// Releases held funds to the provider once the consultation took place.
    pub async fn confirm_occurred(
        &self,
        payment_id: PaymentId,
        actor: Actor,
    ) -> Result<TransitionOutcome> {
        let _lock = self.lock(payment_id).await;

        let record = self.load(payment_id).await?;
        self.authorize(&actor, EscrowAction::Confirm, &record).await?;

        if record.status() == PaymentStatus::Released {
            debug!(payment_id, %actor, "payment already released");
            return Ok(TransitionOutcome::AlreadyDone(record));
        }

        let now = self.clock.now();
        self.release_locked(record, actor.role.into(), now)
            .await
            .map(TransitionOutcome::Applied)
    }

    /// Voids the hold and returns the funds to the payer.
    pub async fn cancel(
        &self,
        payment_id: PaymentId,
        actor: Actor,
        reason: &str,
    ) -> Result<TransitionOutcome> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EscrowError::MissingReason);
        }

        let _lock = self.lock(payment_id).await;

        let record = self.load(payment_id).await?;
        self.authorize(&actor, EscrowAction::Cancel, &record).await?;

        if record.status() == PaymentStatus::Refunded {
            debug!(payment_id, %actor, "payment already refunded");
            return Ok(TransitionOutcome::AlreadyDone(record));
        }
        record.status().next(TransitionEvent::Refund)?;

        let hold_reference = Self::hold_reference(&record)?;
        let refund_reference = self
            .call_gateway(
                "refund",
                payment_id,
                self.gateway.refund(&hold_reference, record.total_amount),
            )
            .await?;

        let mut updated = record;
        updated.refund(
            actor.role.into(),
            reason.to_string(),
            refund_reference,
            self.clock.now(),
        )?;
        let record = self
            .commit(PaymentStatus::PaidHeld, updated, TransitionEvent::Refund)
            .await?;

        info!(payment_id, %actor, reason, "payment refunded");
        Ok(TransitionOutcome::Applied(record))
    }

    pub async fn get_status(&self, payment_id: PaymentId) -> Result<PaymentRecord> {
        self.load(payment_id).await
    }

    /// The non-terminal payment for an appointment, if any.
    pub async fn find_active(&self, appointment_id: AppointmentId) -> Result<Option<PaymentRecord>> {
        self.ledger.find_active(appointment_id).await
    }

    /// Releases one record whose confirmation window has elapsed on the
    /// orchestrator's clock.
    pub async fn auto_release(&self, payment_id: PaymentId) -> Result<TransitionOutcome> {
        let _lock = self.lock(payment_id).await;

        let record = self.load(payment_id).await?;
        let now = self.clock.now();
        if !record.is_due(now) {
            return Err(EscrowError::InvalidTransition {
                from: record.status(),
                event: TransitionEvent::Release,
            });
        }

        self.release_locked(record, Initiator::SystemAuto, now)
            .await
            .map(TransitionOutcome::Applied)
    }

    /// Releases every held record whose deadline has passed.
    ///
    /// Failures are collected per record; one bad record never stops the
    /// sweep.
    pub async fn release_due(&self) -> Result<SweepReport> {
        let due = self.ledger.due_for_release(self.clock.now()).await?;
        let mut report = SweepReport::default();

        for record in due {
            let payment_id = record.payment_id;
            match self.auto_release(payment_id).await {
                Ok(_) => report.released.push(payment_id),
                Err(error) => {
                    warn!(payment_id, error = %error, "auto-release failed");
                    report.failed.push(SweepFailure { payment_id, error });
                }
            }
        }

        if !report.released.is_empty() || !report.failed.is_empty() {
            info!(
                released = report.released.len(),
                failed = report.failed.len(),
                "auto-release sweep finished"
            );
        }
        Ok(report)
    }

    /// Aligns a held record with the processor after an ambiguous failure.
    ///
    /// If the processor already settled or voided the hold, the matching
    /// terminal state is committed locally.
    pub async fn reconcile(&self, payment_id: PaymentId) -> Result<TransitionOutcome> {
        let _lock = self.lock(payment_id).await;

        let record = self.load(payment_id).await?;
        if record.status() != PaymentStatus::PaidHeld {
            return Ok(TransitionOutcome::Unchanged(record));
        }

        let hold_reference = Self::hold_reference(&record)?;
        let state = self
            .call_gateway(
                "query_status",
                payment_id,
                self.gateway.query_status(&hold_reference),
            )
            .await?;

        let now = self.clock.now();
        let mut updated = record.clone();
        let event = match state {
            GatewayHoldState::Held => return Ok(TransitionOutcome::Unchanged(record)),
            GatewayHoldState::Unknown => {
                warn!(payment_id, hold = %hold_reference, "processor does not know this hold");
                return Ok(TransitionOutcome::Unchanged(record));
            }
            // The processor does not report its own settlement id here.
            GatewayHoldState::Released => {
                updated.release(Initiator::Reconciliation, hold_reference, now)?;
                TransitionEvent::Release
            }
            GatewayHoldState::Refunded => {
                updated.refund(
                    Initiator::Reconciliation,
                    "voided at processor".to_string(),
                    hold_reference,
                    now,
                )?;
                TransitionEvent::Refund
            }
        };

        let record = self.commit(PaymentStatus::PaidHeld, updated, event).await?;
        info!(payment_id, status = %record.status(), "payment reconciled with processor");
        Ok(TransitionOutcome::Applied(record))
    }

    async fn release_locked(
        &self,
        record: PaymentRecord,
        by: Initiator,
        now: DateTime<Utc>,
    ) -> Result<PaymentRecord> {
        record.status().next(TransitionEvent::Release)?;

        let payment_id = record.payment_id;
        let hold_reference = Self::hold_reference(&record)?;
        let split = SettlementSplit {
            provider_amount: record.base_price,
            platform_amount: record.platform_fee,
        };
        let settlement = self
            .call_gateway(
                "confirm_release",
                payment_id,
                self.gateway
                    .confirm_release(&hold_reference, record.total_amount, split),
            )
            .await?;

        let mut updated = record;
        updated.release(by, settlement, now)?;
        let record = self
            .commit(PaymentStatus::PaidHeld, updated, TransitionEvent::Release)
            .await?;

        info!(
            payment_id,
            confirmed_by = ?by,
            provider_amount = %record.base_price,
            platform_amount = %record.platform_fee,
            "payment released"
        );
        Ok(record)
    }

    async fn load(&self, payment_id: PaymentId) -> Result<PaymentRecord> {
        self.ledger
            .get(payment_id)
            .await?
            .ok_or(EscrowError::PaymentNotFound(payment_id))
    }

    async fn authorize(
        &self,
        actor: &Actor,
        action: EscrowAction,
        record: &PaymentRecord,
    ) -> Result<()> {
        if self.authorizer.is_allowed(actor, action, record).await? {
            return Ok(());
        }
        warn!(payment_id = record.payment_id, %actor, action = action.as_str(), "action denied");
        Err(EscrowError::Forbidden {
            actor_id: actor.id,
            action: action.as_str(),
            payment_id: record.payment_id,
        })
    }

    async fn commit(
        &self,
        expected: PaymentStatus,
        updated: PaymentRecord,
        event: TransitionEvent,
    ) -> Result<PaymentRecord> {
        let payment_id = updated.payment_id;
        match self.ledger.compare_and_swap(expected, updated).await? {
            SwapOutcome::Swapped(record) => Ok(record),
            SwapOutcome::Conflict(current) => {
                // The gateway call already went through; only reconcile can
                // bring the record back in line.
                error!(
                    payment_id,
                    expected = %expected,
                    found = %current.status(),
                    %event,
                    "ledger changed underneath a gateway call"
                );
                Err(EscrowError::InvalidTransition {
                    from: current.status(),
                    event,
                })
            }
        }
    }

    async fn call_gateway<T>(
        &self,
        operation: &'static str,
        payment_id: PaymentId,
        call: impl Future<Output = GatewayResult<T>>,
    ) -> Result<T> {
        let timeout = self.config.gateway_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                warn!(payment_id, operation, error = %err, "gateway call failed");
                Err(err.into())
            }
            Err(_) => {
                warn!(payment_id, operation, ?timeout, "gateway call timed out");
                Err(EscrowError::GatewayUnavailable(format!(
                    "{operation} timed out after {timeout:?}"
                )))
            }
        }
    }

    fn hold_reference(record: &PaymentRecord) -> Result<String> {
        record.hold_reference.clone().ok_or_else(|| {
            EscrowError::storage(format!(
                "payment {} is held without a hold reference",
                record.payment_id
            ))
        })
    }

    async fn lock(&self, payment_id: PaymentId) -> PaymentLock<'_> {
        let lock = Arc::clone(&self.locks.entry(payment_id).or_default());
        PaymentLock {
            guard: Some(lock.lock_owned().await),
            locks: &self.locks,
            payment_id,
        }
    }
}

/// Exclusive access to one payment. The map entry is evicted on drop unless
/// another request is waiting for it.
struct PaymentLock<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a DashMap<PaymentId, Arc<Mutex<()>>>,
    payment_id: PaymentId,
}

impl Drop for PaymentLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.payment_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
