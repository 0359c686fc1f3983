//! Payment processor adapters.
//!
//! [`MockGateway`] never leaves the process and is what development and test
//! runs use; [`LiveGateway`] talks HTTP/JSON to the real processor. Which one
//! is active is decided once, in [`build`].

pub mod live;
pub mod mock;

pub use live::LiveGateway;
pub use mock::MockGateway;

use crate::config::{EscrowConfig, GatewayMode};
use crate::domain::ports::PaymentGatewayBox;
use crate::error::Result;
use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;

const REFERENCE_SUFFIX_LEN: usize = 9;

/// Builds a reference of the form `<prefix>_<unix-millis>_<suffix>`.
pub fn reference<R: Rng + ?Sized>(prefix: &str, rng: &mut R) -> String {
    let suffix: String = rng
        .sample_iter(&Alphanumeric)
        .take(REFERENCE_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{prefix}_{}_{suffix}", Utc::now().timestamp_millis())
}

/// Instantiates the gateway selected by `config`.
pub fn build(config: &EscrowConfig) -> Result<PaymentGatewayBox> {
    match &config.gateway {
        GatewayMode::Mock => Ok(Box::new(MockGateway::new())),
        GatewayMode::Live { base_url, api_key } => Ok(Box::new(LiveGateway::new(
            base_url,
            api_key,
            config.gateway_timeout,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_reference_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let reference = reference("hold_mock", &mut rng);
        let parts: Vec<&str> = reference.rsplitn(3, '_').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2], "hold_mock");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[0].len(), REFERENCE_SUFFIX_LEN);
        assert!(parts[0].chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_build_selects_mock() {
        let gateway = build(&EscrowConfig::default()).unwrap();
        assert!(gateway.is_mock());
    }

    #[test]
    fn test_build_selects_live() {
        let config = EscrowConfig {
            gateway: GatewayMode::Live {
                base_url: "http://127.0.0.1:9".into(),
                api_key: "secret".into(),
            },
            ..EscrowConfig::default()
        };
        let gateway = build(&config).unwrap();
        assert!(!gateway.is_mock());
    }
}
