use crate::domain::fee::FeePolicy;
use crate::error::{EscrowError, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which [`PaymentGateway`](crate::domain::ports::PaymentGateway) to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayMode {
    Mock,
    Live { base_url: String, api_key: String },
}

#[derive(Debug, Clone)]
pub struct EscrowConfig {
    pub fee_policy: FeePolicy,
    /// Time after the appointment's scheduled start when held funds are
    /// released automatically.
    pub confirmation_window: chrono::Duration,
    /// Upper bound on any single gateway call.
    pub gateway_timeout: Duration,
    pub sweep_interval: Duration,
    pub gateway: GatewayMode,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            fee_policy: FeePolicy::default(),
            confirmation_window: chrono::Duration::hours(6),
            gateway_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(60),
            gateway: GatewayMode::Mock,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| EscrowError::Config(format!("{name} has an invalid value: {raw:?}"))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => {
            Err(EscrowError::Config(format!("{name} is not valid unicode")))
        }
    }
}

impl EscrowConfig {
    /// Reads overrides from `ESCROW_*` environment variables on top of the
    /// defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(rate) = parse_var::<Decimal>("ESCROW_FEE_RATE")? {
            config.fee_policy = FeePolicy::new(rate)?;
        }
        if let Some(minutes) = parse_var::<i64>("ESCROW_CONFIRMATION_WINDOW_MINUTES")? {
            config = config.with_confirmation_window_minutes(minutes)?;
        }
        if let Some(ms) = parse_var::<u64>("ESCROW_GATEWAY_TIMEOUT_MS")? {
            config.gateway_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>("ESCROW_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(base_url) = parse_var::<String>("ESCROW_GATEWAY_URL")? {
            let api_key = parse_var::<String>("ESCROW_GATEWAY_API_KEY")?.ok_or_else(|| {
                EscrowError::Config("ESCROW_GATEWAY_API_KEY is required with ESCROW_GATEWAY_URL".into())
            })?;
            config.gateway = GatewayMode::Live { base_url, api_key };
        }

        Ok(config)
    }

    pub fn with_confirmation_window_minutes(mut self, minutes: i64) -> Result<Self> {
        if minutes < 0 {
            return Err(EscrowError::Config(
                "confirmation window must not be negative".into(),
            ));
        }
        self.confirmation_window = chrono::Duration::minutes(minutes);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = EscrowConfig::default();
        assert_eq!(config.fee_policy.rate(), dec!(0.20));
        assert_eq!(config.confirmation_window, chrono::Duration::hours(6));
        assert_eq!(config.gateway, GatewayMode::Mock);
    }

    #[test]
    fn test_negative_window_is_rejected() {
        assert!(matches!(
            EscrowConfig::default().with_confirmation_window_minutes(-1),
            Err(EscrowError::Config(_))
        ));
        let config = EscrowConfig::default()
            .with_confirmation_window_minutes(90)
            .unwrap();
        assert_eq!(config.confirmation_window, chrono::Duration::minutes(90));
    }
}
