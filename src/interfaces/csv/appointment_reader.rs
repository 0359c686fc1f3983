use crate::domain::appointment::{ActorId, Appointment, AppointmentId};
use crate::error::{EscrowError, Result};
use crate::infrastructure::in_memory::Participants;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One row of the appointments file.
///
/// Expected header: `id,base_price,scheduled_at,patient_id,doctor_id`, with
/// `scheduled_at` in RFC 3339.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AppointmentRow {
    pub id: AppointmentId,
    pub base_price: Decimal,
    pub scheduled_at: DateTime<Utc>,
    pub patient_id: ActorId,
    pub doctor_id: ActorId,
}

impl AppointmentRow {
    pub fn appointment(&self) -> Appointment {
        Appointment {
            id: self.id,
            base_price: self.base_price,
            scheduled_at: self.scheduled_at,
        }
    }

    pub fn participants(&self) -> Participants {
        Participants {
            patient_id: self.patient_id,
            doctor_id: self.doctor_id,
        }
    }
}

/// Reads appointments from a CSV source.
pub struct AppointmentReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> AppointmentReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows; a bad row yields an error without ending the
    /// stream.
    pub fn appointments(self) -> impl Iterator<Item = Result<AppointmentRow>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(EscrowError::from))
    }
}
