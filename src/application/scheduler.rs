use super::orchestrator::{PaymentOrchestrator, SweepReport};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

/// Periodically releases held payments whose confirmation window elapsed.
pub struct AutoReleaseScheduler {
    orchestrator: Arc<PaymentOrchestrator>,
    every: Duration,
}

impl AutoReleaseScheduler {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>, every: Duration) -> Self {
        Self {
            orchestrator,
            every,
        }
    }

    /// Runs a single sweep at the orchestrator's current time.
    pub async fn tick(&self) -> Result<SweepReport> {
        self.orchestrator.release_due().await
    }

    /// Sweeps on every interval tick until `shutdown` flips to `true` or its
    /// sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(every = ?self.every, "auto-release scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "auto-release sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("auto-release scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EscrowConfig;
    use crate::domain::appointment::Appointment;
    use crate::domain::instrument::{InstrumentDetails, PaymentMethod};
    use crate::domain::payment::PaymentStatus;
    use crate::infrastructure::gateway::MockGateway;
    use crate::infrastructure::in_memory::{
        InMemoryAppointmentDirectory, InMemoryPaymentLedger, ParticipantAuthorizer,
    };
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal_macros::dec;

    async fn orchestrator_with_elapsed_hold() -> (Arc<PaymentOrchestrator>, u64) {
        let directory = InMemoryAppointmentDirectory::new();
        // Started long enough ago that the window is already over.
        directory
            .insert(Appointment {
                id: 1,
                base_price: dec!(80.00),
                scheduled_at: Utc::now() - ChronoDuration::hours(7),
            })
            .await;
        let orchestrator = PaymentOrchestrator::new(
            Box::new(InMemoryPaymentLedger::new()),
            Box::new(directory),
            Box::new(ParticipantAuthorizer::new()),
            Box::new(MockGateway::new()),
            EscrowConfig::default(),
        );
        let record = orchestrator.create_intent(1, 1).await.unwrap();
        orchestrator
            .submit_instrument(record.payment_id, PaymentMethod::Pix, &InstrumentDetails::default(), 1)
            .await
            .unwrap();
        (Arc::new(orchestrator), record.payment_id)
    }

    #[tokio::test]
    async fn test_tick_releases_due_payments() {
        let (orchestrator, payment_id) = orchestrator_with_elapsed_hold().await;
        let scheduler = AutoReleaseScheduler::new(Arc::clone(&orchestrator), Duration::from_secs(60));

        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.released, vec![payment_id]);
        assert!(scheduler.tick().await.unwrap().released.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (orchestrator, payment_id) = orchestrator_with_elapsed_hold().await;
        let scheduler = AutoReleaseScheduler::new(Arc::clone(&orchestrator), Duration::from_millis(10));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(scheduler.run(rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let record = orchestrator.get_status(payment_id).await.unwrap();
        assert_eq!(record.status(), PaymentStatus::Released);
    }
}
