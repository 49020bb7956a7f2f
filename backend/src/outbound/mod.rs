//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **portals**: reqwest-backed regional portal adapters
//! - **storage**: in-memory and JSON-lines invoice stores
//! - **roles_file**, **activity_file**: JSON snapshot persistence
//! - **alerts**, **qr**, **text_report**: collaborator defaults
//!
//! Adapters are thin translators that convert between domain types and
//! infrastructure-specific representations. They contain no business logic.

pub mod activity_file;
pub mod alerts;
pub mod portals;
pub mod qr;
pub mod roles_file;
mod snapshot_file;
pub mod storage;
pub mod text_report;
