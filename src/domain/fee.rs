use crate::error::{EscrowError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Currency minor unit precision (centavos).
pub const MINOR_UNIT_DP: u32 = 2;

/// Rounds half-up to the currency minor unit and pins the scale to two digits.
pub fn round_minor(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(MINOR_UNIT_DP, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MINOR_UNIT_DP);
    rounded
}

/// A positive monetary amount with at most two fractional digits.
///
/// Wraps `rust_decimal::Decimal` so prices coming from collaborators are
/// checked once, at the boundary, and carried around already validated.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value <= Decimal::ZERO {
            return Err(EscrowError::InvalidAmount(format!(
                "amount must be positive, got {value}"
            )));
        }
        if value.normalize().scale() > MINOR_UNIT_DP {
            return Err(EscrowError::InvalidAmount(format!(
                "amount must have at most {MINOR_UNIT_DP} fractional digits, got {value}"
            )));
        }
        Ok(Self(round_minor(value)))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = EscrowError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl Add for Amount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The platform margin applied on top of a provider's base price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeePolicy {
    rate: Decimal,
}

impl FeePolicy {
    pub const DEFAULT_RATE: Decimal = dec!(0.20);

    pub fn new(rate: Decimal) -> Result<Self> {
        if rate < Decimal::ZERO || rate >= Decimal::ONE {
            return Err(EscrowError::InvalidAmount(format!(
                "platform fee rate must be in [0, 1), got {rate}"
            )));
        }
        Ok(Self { rate })
    }

    pub fn rate(&self) -> Decimal {
        self.rate
    }

    /// Computes the payer-facing total for `base_price`.
    ///
    /// The fee is rounded half-up on the second decimal digit, so a base price
    /// of `33.33` yields a fee of `6.67` and a total of `40.00`.
    pub fn compute_total(&self, base_price: Decimal) -> Result<FeeBreakdown> {
        let base = Amount::new(base_price)?;
        let platform_fee = round_minor(base.value() * self.rate);
        Ok(FeeBreakdown {
            base_price: base.value(),
            platform_fee,
            total_amount: round_minor(base.value() + platform_fee),
        })
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            rate: Self::DEFAULT_RATE,
        }
    }
}

/// Fee split frozen into a payment record at intent creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub base_price: Decimal,
    pub platform_fee: Decimal,
    pub total_amount: Decimal,
}

impl FeeBreakdown {
    /// True when the payer is charged more than the provider's price.
    pub fn has_platform_fee(&self) -> bool {
        self.total_amount != self.base_price
    }
}
