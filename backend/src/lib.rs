//! Invoice ingestion and authorisation backend.
//!
//! The crate is laid out hexagonally: [`domain`] holds the services and the
//! ports they depend on, [`outbound`] implements those ports (HTTP portals,
//! JSON-lines storage, role snapshots), and [`inbound`] turns chat text into
//! typed commands. [`bot`] wires everything together from [`config`].

pub mod bot;
pub mod config;
pub mod domain;
pub mod inbound;
pub mod outbound;
pub mod telemetry;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use bot::{Bot, BotComponents, BootstrapError, assemble, from_settings};
