use crate::domain::instrument::FieldError;
use crate::domain::payment::{PaymentStatus, TransitionEvent};
use thiserror::Error;

/// Failures reported by a [`PaymentGateway`](crate::domain::ports::PaymentGateway).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Network failure, timeout or processor-side 5xx. Safe to retry.
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
    /// The processor refused to authorize the charge.
    #[error("payment declined: {0}")]
    Declined(String),
    /// The processor rejected the request as malformed.
    #[error("payment rejected by gateway: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid payment instrument")]
    InvalidInstrument(Vec<FieldError>),

    #[error("a cancellation reason is required")]
    MissingReason,

    #[error("appointment {appointment_id} already has active payment {payment_id}")]
    DuplicateIntent {
        appointment_id: u64,
        payment_id: u64,
    },

    #[error("cannot {event} a payment in status {from}")]
    InvalidTransition {
        from: PaymentStatus,
        event: TransitionEvent,
    },

    #[error("actor {actor_id} is not allowed to {action} payment {payment_id}")]
    Forbidden {
        actor_id: u64,
        action: &'static str,
        payment_id: u64,
    },

    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("payment declined: {0}")]
    PaymentDeclined(String),

    /// The processor refused a settlement or refund request.
    #[error("payment gateway rejected the request: {0}")]
    GatewayRejected(String),

    #[error("payment {0} not found")]
    PaymentNotFound(u64),

    #[error("appointment {0} not found")]
    AppointmentNotFound(u64),

    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EscrowError>;

impl EscrowError {
    /// HTTP-style status code for the wire response.
    pub fn status_code(&self) -> u16 {
        match self {
            EscrowError::InvalidAmount(_)
            | EscrowError::InvalidInstrument(_)
            | EscrowError::MissingReason => 422,
            EscrowError::DuplicateIntent { .. } | EscrowError::InvalidTransition { .. } => 409,
            EscrowError::Forbidden { .. } => 403,
            EscrowError::PaymentNotFound(_) | EscrowError::AppointmentNotFound(_) => 404,
            EscrowError::PaymentDeclined(_) => 402,
            EscrowError::GatewayRejected(_) => 502,
            EscrowError::GatewayUnavailable(_) => 503,
            EscrowError::Storage(_)
            | EscrowError::Config(_)
            | EscrowError::Csv(_)
            | EscrowError::Io(_) => 500,
        }
    }

    /// Whether the same request may be repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EscrowError::GatewayUnavailable(_))
    }

    /// Short machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            EscrowError::InvalidAmount(_) => "invalid_amount",
            EscrowError::InvalidInstrument(_) => "invalid_instrument",
            EscrowError::MissingReason => "missing_reason",
            EscrowError::DuplicateIntent { .. } => "duplicate_intent",
            EscrowError::InvalidTransition { .. } => "invalid_transition",
            EscrowError::Forbidden { .. } => "forbidden",
            EscrowError::GatewayUnavailable(_) => "gateway_unavailable",
            EscrowError::PaymentDeclined(_) => "payment_declined",
            EscrowError::GatewayRejected(_) => "gateway_rejected",
            EscrowError::PaymentNotFound(_) => "payment_not_found",
            EscrowError::AppointmentNotFound(_) => "appointment_not_found",
            EscrowError::Storage(_)
            | EscrowError::Config(_)
            | EscrowError::Csv(_)
            | EscrowError::Io(_) => "internal",
        }
    }

    pub(crate) fn storage(message: impl Into<String>) -> Self {
        EscrowError::Storage(Box::new(std::io::Error::other(message.into())))
    }
}

impl From<GatewayError> for EscrowError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(reason) => EscrowError::GatewayUnavailable(reason),
            GatewayError::Declined(reason) => EscrowError::PaymentDeclined(reason),
            GatewayError::Rejected(reason) => EscrowError::GatewayRejected(reason),
        }
    }
}

impl From<serde_json::Error> for EscrowError {
    fn from(err: serde_json::Error) -> Self {
        EscrowError::Storage(Box::new(err))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for EscrowError {
    fn from(err: rocksdb::Error) -> Self {
        EscrowError::Storage(Box::new(err))
    }
}
