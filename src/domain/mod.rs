//! Domain model: money, instruments, the escrow record and the ports through
//! which the application layer reaches collaborators.

pub mod appointment;
pub mod fee;
pub mod instrument;
pub mod payment;
pub mod ports;
