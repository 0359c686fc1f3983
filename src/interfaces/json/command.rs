use crate::domain::appointment::{Actor, AppointmentId};
use crate::domain::instrument::{InstrumentDetails, PaymentMethod};
use crate::domain::payment::PaymentId;
use serde::Deserialize;
use std::io::BufRead;
use thiserror::Error;

fn one() -> u32 {
    1
}

/// A single request, tagged by `"op"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CreateIntent {
        appointment_id: AppointmentId,
        #[serde(default = "one")]
        installments: u32,
    },
    SubmitInstrument {
        payment_id: PaymentId,
        method: PaymentMethod,
        #[serde(flatten)]
        details: InstrumentDetails,
        #[serde(default = "one")]
        installments: u32,
    },
    Confirm {
        payment_id: PaymentId,
        actor: Actor,
    },
    Cancel {
        payment_id: PaymentId,
        actor: Actor,
        #[serde(default)]
        reason: String,
    },
    Status {
        payment_id: PaymentId,
    },
    /// Runs the auto-release sweep at the current time.
    Sweep,
    Reconcile {
        payment_id: PaymentId,
    },
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads commands from a JSON-lines source, skipping blank lines.
pub struct CommandReader<R: BufRead> {
    source: R,
}

impl<R: BufRead> CommandReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    pub fn commands(self) -> impl Iterator<Item = Result<Command, CommandError>> {
        self.source
            .lines()
            .enumerate()
            .filter(|(_, line)| !matches!(line, Ok(text) if text.trim().is_empty()))
            .map(|(index, line)| {
                let text = line?;
                serde_json::from_str(&text).map_err(|source| CommandError::Malformed {
                    line: index + 1,
                    source,
                })
            })
    }
}
