use super::reference;
use crate::domain::instrument::Instrument;
use crate::domain::payment::HoldReceipt;
use crate::domain::ports::{
    GatewayHoldState, GatewayResult, HoldRequest, PaymentGateway, SettlementSplit,
};
use crate::error::GatewayError;
use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Number of calls received per capability.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MockGatewayStats {
    pub holds: usize,
    pub releases: usize,
    pub refunds: usize,
    pub queries: usize,
}

const HOLD_PREFIX: &str = "hold_mock_";

#[derive(Default)]
struct Counters {
    holds: AtomicUsize,
    releases: AtomicUsize,
    refunds: AtomicUsize,
    queries: AtomicUsize,
}

/// In-process stand-in for the payment processor.
///
/// Holds are tracked in memory so follow-up calls and status queries behave
/// like the real thing. A well-formed `hold_mock_` reference issued by an
/// earlier process is settled or refunded as if it were still held. Latency,
/// outages and lost responses can be simulated.
pub struct MockGateway {
    holds: RwLock<HashMap<String, GatewayHoldState>>,
    rng: Mutex<StdRng>,
    latency: Duration,
    unavailable: AtomicBool,
    lose_responses: AtomicBool,
    counters: Counters,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Reference suffixes become reproducible for a given seed.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            holds: RwLock::new(HashMap::new()),
            rng: Mutex::new(rng),
            latency: Duration::ZERO,
            unavailable: AtomicBool::new(false),
            lose_responses: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes every call fail with `Unavailable` without side effects.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Applies every call but reports `Unavailable`, as if the response was
    /// lost on the way back.
    pub fn set_lose_responses(&self, lose: bool) {
        self.lose_responses.store(lose, Ordering::SeqCst);
    }

    pub fn stats(&self) -> MockGatewayStats {
        MockGatewayStats {
            holds: self.counters.holds.load(Ordering::SeqCst),
            releases: self.counters.releases.load(Ordering::SeqCst),
            refunds: self.counters.refunds.load(Ordering::SeqCst),
            queries: self.counters.queries.load(Ordering::SeqCst),
        }
    }

    fn next_reference(&self, prefix: &str) -> String {
        // The lock only guards the rng; never held across an await.
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        reference(prefix, &mut *rng)
    }

    async fn simulate_network(&self) -> GatewayResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("[MOCK] gateway offline".into()));
        }
        Ok(())
    }

    fn respond<T>(&self, value: T) -> GatewayResult<T> {
        if self.lose_responses.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("[MOCK] response lost".into()));
        }
        Ok(value)
    }

    /// Current state of a hold, treating unseen mock references as held.
    fn hold_state(
        holds: &HashMap<String, GatewayHoldState>,
        hold_reference: &str,
    ) -> Option<GatewayHoldState> {
        match holds.get(hold_reference) {
            Some(state) => Some(*state),
            None if hold_reference.starts_with(HOLD_PREFIX) => {
                debug!(hold = hold_reference, "[MOCK] adopting hold from an earlier run");
                Some(GatewayHoldState::Held)
            }
            None => None,
        }
    }

    fn check_format(instrument: &Instrument) -> GatewayResult<()> {
        if let Instrument::Card { card, .. } = instrument {
            let number_ok = card.number.len() == 16 && card.number.bytes().all(|b| b.is_ascii_digit());
            let cvv_ok = (3..=4).contains(&card.cvv.len());
            if !number_ok || !cvv_ok {
                return Err(GatewayError::Rejected("[MOCK] malformed card data".into()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn authorize_and_hold(&self, request: HoldRequest) -> GatewayResult<HoldReceipt> {
        self.counters.holds.fetch_add(1, Ordering::SeqCst);
        self.simulate_network().await?;
        Self::check_format(&request.instrument)?;

        let token_prefix = match request.instrument {
            Instrument::Card { .. } => "card_mock",
            Instrument::Pix => "pix_mock",
        };
        let receipt = HoldReceipt {
            instrument_token: self.next_reference(token_prefix),
            hold_reference: self.next_reference("hold_mock"),
            payment_reference: self.next_reference("pay_mock"),
        };
        self.holds
            .write()
            .await
            .insert(receipt.hold_reference.clone(), GatewayHoldState::Held);

        info!(
            payment_id = request.payment_id,
            amount = %request.amount,
            hold = %receipt.hold_reference,
            "[MOCK] funds held"
        );
        self.respond(receipt)
    }

    async fn confirm_release(
        &self,
        hold_reference: &str,
        amount: Decimal,
        split: SettlementSplit,
    ) -> GatewayResult<String> {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
        self.simulate_network().await?;

        let mut holds = self.holds.write().await;
        match Self::hold_state(&holds, hold_reference) {
            Some(GatewayHoldState::Held) => {
                holds.insert(hold_reference.to_string(), GatewayHoldState::Released);
            }
            Some(GatewayHoldState::Released) => {
                debug!(hold = hold_reference, "[MOCK] hold already released");
            }
            Some(_) => {
                return Err(GatewayError::Rejected(format!(
                    "[MOCK] hold {hold_reference} was refunded"
                )));
            }
            None => {
                return Err(GatewayError::Rejected(format!(
                    "[MOCK] unknown hold {hold_reference}"
                )));
            }
        }
        drop(holds);

        info!(
            hold = hold_reference,
            %amount,
            provider_amount = %split.provider_amount,
            platform_amount = %split.platform_amount,
            "[MOCK] hold released"
        );
        let settlement = self.next_reference("trans_mock");
        self.respond(settlement)
    }

    async fn refund(&self, hold_reference: &str, amount: Decimal) -> GatewayResult<String> {
        self.counters.refunds.fetch_add(1, Ordering::SeqCst);
        self.simulate_network().await?;

        let mut holds = self.holds.write().await;
        match Self::hold_state(&holds, hold_reference) {
            Some(GatewayHoldState::Held) => {
                holds.insert(hold_reference.to_string(), GatewayHoldState::Refunded);
            }
            Some(GatewayHoldState::Refunded) => {
                debug!(hold = hold_reference, "[MOCK] hold already refunded");
            }
            Some(_) => {
                return Err(GatewayError::Rejected(format!(
                    "[MOCK] hold {hold_reference} was released"
                )));
            }
            None => {
                return Err(GatewayError::Rejected(format!(
                    "[MOCK] unknown hold {hold_reference}"
                )));
            }
        }
        drop(holds);

        info!(hold = hold_reference, %amount, "[MOCK] hold refunded");
        let refund = self.next_reference("refund_mock");
        self.respond(refund)
    }

    async fn query_status(&self, hold_reference: &str) -> GatewayResult<GatewayHoldState> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);
        self.simulate_network().await?;
        let holds = self.holds.read().await;
        Ok(holds
            .get(hold_reference)
            .copied()
            .unwrap_or(GatewayHoldState::Unknown))
    }

    fn is_mock(&self) -> bool {
        true
    }
}
