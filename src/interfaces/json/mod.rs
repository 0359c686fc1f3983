//! JSON-lines request replay: one command per input line, one response per
//! output line.

pub mod command;
pub mod handler;
pub mod response;
