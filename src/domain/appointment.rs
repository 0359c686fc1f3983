use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type AppointmentId = u64;
pub type ActorId = u64;

/// Read-only view of an appointment owned by the scheduling subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    /// Provider's current consultation price.
    pub base_price: Decimal,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Patient,
    Doctor,
    System,
}

/// The party issuing a confirm or cancel request.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub struct Actor {
    pub id: ActorId,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: ActorId, role: ActorRole) -> Self {
        Self { id, role }
    }

    /// The ledger-side scheduler acting on its own behalf.
    pub fn system() -> Self {
        Self {
            id: 0,
            role: ActorRole::System,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.role, self.id)
    }
}
