//! Application layer: the escrow use cases.
//!
//! [`orchestrator::PaymentOrchestrator`] composes the fee policy, the gateway
//! and the ledger; [`scheduler::AutoReleaseScheduler`] drives the deadline
//! sweep and [`presenter`] derives the user-facing status view.

pub mod orchestrator;
pub mod presenter;
pub mod scheduler;
