use crate::domain::instrument::Instrument;
use crate::domain::payment::HoldReceipt;
use crate::domain::ports::{
    GatewayHoldState, GatewayResult, HoldRequest, PaymentGateway, SettlementSplit,
};
use crate::error::{EscrowError, GatewayError, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

const CURRENCY: &str = "BRL";

#[derive(Serialize)]
struct CardPayload<'a> {
    number: &'a str,
    holder: &'a str,
    expiry_month: u32,
    expiry_year: i32,
    cvv: &'a str,
}

#[derive(Serialize)]
struct HoldPayload<'a> {
    reference: String,
    amount: Decimal,
    currency: &'static str,
    installments: u32,
    method: String,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    card: Option<CardPayload<'a>>,
}

#[derive(Deserialize)]
struct HoldResponse {
    instrument_token: String,
    hold_id: String,
    payment_id: String,
}

#[derive(Serialize)]
struct ReleasePayload<'a> {
    amount: Decimal,
    split: &'a SettlementSplit,
}

#[derive(Deserialize)]
struct ReleaseResponse {
    transfer_id: String,
}

#[derive(Serialize)]
struct RefundPayload {
    amount: Decimal,
}

#[derive(Deserialize)]
struct RefundResponse {
    refund_id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: GatewayHoldState,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// HTTP/JSON client for the real payment processor.
pub struct LiveGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

impl LiveGateway {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EscrowError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> GatewayResult<T> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> GatewayResult<T> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    warn!(error = %err, "payment processor unreachable");
    GatewayError::Unavailable(err.to_string())
}

async fn decode<T: DeserializeOwned>(response: Response) -> GatewayResult<T> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(|e| {
            error!(error = %e, "malformed payment processor response");
            GatewayError::Unavailable(format!("malformed processor response: {e}"))
        });
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.message)
        .unwrap_or_else(|_| format!("HTTP {status}"));

    Err(match status {
        StatusCode::PAYMENT_REQUIRED => GatewayError::Declined(message),
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            GatewayError::Unavailable(message)
        }
        _ => GatewayError::Rejected(message),
    })
}

#[async_trait]
impl PaymentGateway for LiveGateway {
    async fn authorize_and_hold(&self, request: HoldRequest) -> GatewayResult<HoldReceipt> {
        let card = match &request.instrument {
            Instrument::Card { card, .. } => Some(CardPayload {
                number: &card.number,
                holder: &card.holder,
                expiry_month: card.expiry_month,
                expiry_year: card.expiry_year,
                cvv: &card.cvv,
            }),
            Instrument::Pix => None,
        };
        let payload = HoldPayload {
            reference: request.payment_id.to_string(),
            amount: request.amount,
            currency: CURRENCY,
            installments: request.installments,
            method: request.instrument.method().to_string(),
            description: &request.description,
            card,
        };

        let response: HoldResponse = self.post("/holds", &payload).await?;
        info!(
            payment_id = request.payment_id,
            hold = %response.hold_id,
            "processor authorized hold"
        );
        Ok(HoldReceipt {
            instrument_token: response.instrument_token,
            hold_reference: response.hold_id,
            payment_reference: response.payment_id,
        })
    }

    async fn confirm_release(
        &self,
        hold_reference: &str,
        amount: Decimal,
        split: SettlementSplit,
    ) -> GatewayResult<String> {
        let response: ReleaseResponse = self
            .post(
                &format!("/holds/{hold_reference}/release"),
                &ReleasePayload {
                    amount,
                    split: &split,
                },
            )
            .await?;
        Ok(response.transfer_id)
    }

    async fn refund(&self, hold_reference: &str, amount: Decimal) -> GatewayResult<String> {
        let response: RefundResponse = self
            .post(&format!("/holds/{hold_reference}/refund"), &RefundPayload { amount })
            .await?;
        Ok(response.refund_id)
    }

    async fn query_status(&self, hold_reference: &str) -> GatewayResult<GatewayHoldState> {
        let response: StatusResponse = self.get(&format!("/holds/{hold_reference}")).await?;
        Ok(response.status)
    }

    fn is_mock(&self) -> bool {
        false
    }
}
