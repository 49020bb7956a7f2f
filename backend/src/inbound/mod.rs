//! Inbound adapters that translate external messages into domain commands
//! while keeping transport details at the edge.
//!
//! Text parsing and rendering live under [`chat`]; [`console`] drives the
//! command service from a line-oriented stream such as stdin.

pub mod chat;
pub mod console;
