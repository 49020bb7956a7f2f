//! Domain primitives, services and ports.
//!
//! Purpose: model invoice ingestion and authorisation independently of any
//! transport or storage technology. Services depend only on the traits in
//! [`ports`]; adapters live under `crate::outbound` and `crate::inbound`.
//!
//! Public surface:
//! - [`AccessControlGate`] and the [`Role`]/[`Action`] capability table.
//! - [`RateLimiter`] keyed by user and [`ActionClass`].
//! - [`resolve_reference`] turning QR text into a [`CanonicalReference`].
//! - [`PortalRegistry`] with retrying fetch over [`ports::PortalAdapter`]s.
//! - [`parse_document`] producing a [`ParsedInvoice`].
//! - [`SubmissionPipeline`], the submission state machine.
//! - [`ReportAggregator`] and [`summarize`].
//! - [`CommandService`], the command dispatcher.

pub mod access;
pub mod activity;
pub mod commands;
pub mod error;
pub mod invoice;
pub mod money;
pub mod parser;
pub mod pipeline;
pub mod portal_registry;
pub mod ports;
pub mod rate_limit;
pub mod reference;
pub mod report;
pub mod user;

pub use self::access::{AccessControlGate, Capability, RoleAssignment, RoleChange, RoleSnapshot};
pub use self::activity::{ActivityEntry, ActivitySnapshot, ActivityTracker};
pub use self::commands::{
    BotStats, Command, CommandHelp, CommandRequest, CommandService, CommandServiceParts,
    DEFAULT_LOG_LINES, MAX_LOG_LINES, Reply, RoleCount,
};
pub use self::error::{ErrorCode, FetchFailureKind, PipelineError};
pub use self::invoice::{
    Fingerprint, Invoice, InvoiceHeader, Issuer, LineItem, ParsedInvoice, ParsedLineItem,
    Payment, PaymentMethod, StoredRecord,
};
pub use self::money::{parse_amount, round_cents};
pub use self::parser::{LINE_SUM_TOLERANCE, parse_document};
pub use self::pipeline::{
    Acknowledgment, InvoiceSummary, SubmissionFailure, SubmissionInput, SubmissionPipeline,
    SubmissionPorts, SubmissionStage, TerminalState,
};
pub use self::portal_registry::{
    AttemptJitter, BackoffJitter, FetchRetryPolicy, FetchSleeper, PortalRegistry,
    PortalRegistryBuilder, PortalRegistryRuntime, TokioSleeper,
};
pub use self::rate_limit::{
    ActionClass, MonotonicClock, RateLimitIntervals, RateLimitKey, RateLimiter,
    SystemMonotonicClock,
};
pub use self::reference::{
    AccessKey, AccessKeyError, CanonicalReference, Environment, InvoiceModel,
    PORTAL_LOCAL_OFFSET_SECS, ReferenceFormat, Region, check_digit, resolve_reference,
};
pub use self::report::{
    IssuerRow, ProductRow, ReportAggregator, ReportPeriod, ReportScope, ReportSummary, SummaryRow,
    UnknownPeriod, report_window, summarize,
};
pub use self::user::{Action, Role, RoleSet, UnknownRole, UserId};
