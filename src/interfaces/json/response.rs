use crate::application::orchestrator::{SweepReport, TransitionOutcome};
use crate::application::presenter::StatusView;
use crate::domain::instrument::FieldError;
use crate::domain::payment::{PaymentId, PaymentRecord, PaymentStatus};
use crate::error::EscrowError;
use serde::Serialize;
use std::io::{self, Write};

#[derive(Debug, Serialize)]
pub struct IntentCreated {
    pub payment_id: PaymentId,
    pub client_secret_or_token: String,
    pub status: PaymentStatus,
}

#[derive(Debug, Serialize)]
pub struct TransitionBody {
    pub success: bool,
    pub payment_id: PaymentId,
    pub status: PaymentStatus,
    /// The record was already in the requested state.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub already_done: bool,
    /// Set by reconcile when the record did not change.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub unchanged: bool,
}

#[derive(Debug, Serialize)]
pub struct SweepFailureBody {
    pub payment_id: PaymentId,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct SweepBody {
    pub success: bool,
    pub released: Vec<PaymentId>,
    pub failed: Vec<SweepFailureBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub code: &'static str,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<Vec<FieldError>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    IntentCreated(IntentCreated),
    Transition(TransitionBody),
    Status(Box<StatusView>),
    Sweep(SweepBody),
    Error(ErrorBody),
}

/// The wire envelope: an HTTP-style status code and a JSON body.
#[derive(Debug, Serialize)]
pub struct Response {
    pub status_code: u16,
    pub body: ResponseBody,
}

impl Response {
    fn ok(body: ResponseBody) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    pub fn intent_created(record: &PaymentRecord) -> Self {
        Self::ok(ResponseBody::IntentCreated(IntentCreated {
            payment_id: record.payment_id,
            client_secret_or_token: record.client_token.clone(),
            status: record.status(),
        }))
    }

    pub fn held(record: &PaymentRecord) -> Self {
        Self::ok(ResponseBody::Transition(TransitionBody {
            success: true,
            payment_id: record.payment_id,
            status: record.status(),
            already_done: false,
            unchanged: false,
        }))
    }

    pub fn transition(outcome: &TransitionOutcome) -> Self {
        let record = outcome.record();
        Self::ok(ResponseBody::Transition(TransitionBody {
            success: true,
            payment_id: record.payment_id,
            status: record.status(),
            already_done: matches!(outcome, TransitionOutcome::AlreadyDone(_)),
            unchanged: matches!(outcome, TransitionOutcome::Unchanged(_)),
        }))
    }

    pub fn status(view: StatusView) -> Self {
        Self::ok(ResponseBody::Status(Box::new(view)))
    }

    pub fn sweep(report: SweepReport) -> Self {
        Self::ok(ResponseBody::Sweep(SweepBody {
            success: report.failed.is_empty(),
            released: report.released,
            failed: report
                .failed
                .into_iter()
                .map(|failure| SweepFailureBody {
                    payment_id: failure.payment_id,
                    error: failure.error.to_string(),
                })
                .collect(),
        }))
    }

    pub fn error(err: &EscrowError) -> Self {
        let field_errors = match err {
            EscrowError::InvalidInstrument(fields) => Some(fields.clone()),
            _ => None,
        };
        Self {
            status_code: err.status_code(),
            body: ResponseBody::Error(ErrorBody {
                success: false,
                error: err.to_string(),
                code: err.code(),
                retryable: err.is_retryable(),
                field_errors,
            }),
        }
    }
}

/// Writes one JSON document per line.
pub struct ResponseWriter<W: Write> {
    writer: W,
}

impl<W: Write> ResponseWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_response(&mut self, response: &Response) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, response)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}
