//! Invoice submission state machine.
//!
//! A submission moves through
//! `Received → Authorized → RateLimitOk → Resolved → Fetched → Parsed →
//! Stored → Acknowledged`. Each transition can end the submission in a
//! dedicated [`TerminalState`] that carries the error; later stages never
//! run after a failure.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument};

use super::access::AccessControlGate;
use super::error::PipelineError;
use super::invoice::{Fingerprint, StoredRecord};
use super::parser::parse_document;
use super::portal_registry::PortalRegistry;
use super::ports::{InvoiceStore, OperatorAlerts, QrDecodeError, QrDecoder, StorageAlert};
use super::rate_limit::{ActionClass, RateLimiter};
use super::reference::{CanonicalReference, Region, resolve_reference};
use super::user::{Action, UserId};

/// Non-terminal stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStage {
    /// Input accepted for processing.
    Received,
    /// Caller holds the submit capability.
    Authorized,
    /// Caller is within the submission interval.
    RateLimitOk,
    /// Reference resolved to a canonical form.
    Resolved,
    /// Portal document fetched.
    Fetched,
    /// Document parsed into an invoice.
    Parsed,
    /// Invoice committed, or found already committed.
    Stored,
    /// Reply produced.
    Acknowledged,
}

/// Failure terminals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// Authorisation failed.
    Denied,
    /// Rate limit hit.
    Limited,
    /// Reference could not be resolved.
    InvalidRef,
    /// Portal unsupported or fetch failed.
    FetchFailed,
    /// Mandatory field missing.
    ParseFailed,
    /// Store read or write failed.
    StoreFailed,
}

/// Submission that ended in a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error}")]
pub struct SubmissionFailure {
    /// Terminal reached.
    pub state: TerminalState,
    /// Cause.
    pub error: PipelineError,
    /// Last stage completed before the failure.
    pub reached: SubmissionStage,
}

impl From<SubmissionFailure> for PipelineError {
    fn from(failure: SubmissionFailure) -> Self {
        failure.error
    }
}

/// What the user sent.
#[derive(Clone, PartialEq, Eq)]
pub enum SubmissionInput {
    /// Reference text (usually a QR URL).
    Reference(String),
    /// Photo to be QR-decoded.
    Photo(Vec<u8>),
}

impl fmt::Debug for SubmissionInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference(text) => f.debug_tuple("Reference").field(text).finish(),
            Self::Photo(bytes) => write!(f, "Photo({} bytes)", bytes.len()),
        }
    }
}

/// Short description of a stored invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceSummary {
    /// Issuing region.
    pub region: Region,
    /// Issuer CNPJ.
    pub issuer_id: String,
    /// Issuer name.
    pub issuer_name: Option<String>,
    /// Document number.
    pub number: u32,
    /// Series.
    pub series: u16,
    /// Emission timestamp.
    pub emitted_at: DateTime<Utc>,
    /// Declared total.
    pub total: Decimal,
    /// Number of line items.
    pub item_count: usize,
    /// First submitter.
    pub submitted_by: UserId,
}

impl From<&StoredRecord> for InvoiceSummary {
    fn from(record: &StoredRecord) -> Self {
        let header = &record.invoice.header;
        Self {
            region: header.region,
            issuer_id: header.issuer.id.clone(),
            issuer_name: header.issuer.name.clone(),
            number: header.number,
            series: header.series,
            emitted_at: header.emitted_at,
            total: header.total,
            item_count: record.line_items.len(),
            submitted_by: record.invoice.submitted_by,
        }
    }
}

/// Successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Acknowledgment {
    /// Invoice fingerprint.
    pub fingerprint: Fingerprint,
    /// Whether the invoice was already stored.
    pub duplicate: bool,
    /// Stored record summary.
    pub invoice: InvoiceSummary,
    /// Stages traversed.
    pub stages: Vec<SubmissionStage>,
}

/// Port bundle required by the pipeline.
pub struct SubmissionPorts {
    /// Deduplication store.
    pub store: Arc<dyn InvoiceStore>,
    /// QR decoder for photos.
    pub qr_decoder: Arc<dyn QrDecoder>,
    /// Operator escalation.
    pub alerts: Arc<dyn OperatorAlerts>,
}

impl SubmissionPorts {
    /// Build a port bundle.
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        qr_decoder: Arc<dyn QrDecoder>,
        alerts: Arc<dyn OperatorAlerts>,
    ) -> Self {
        Self {
            store,
            qr_decoder,
            alerts,
        }
    }
}

/// Drives one submission through every stage.
pub struct SubmissionPipeline {
    gate: Arc<AccessControlGate>,
    limiter: Arc<RateLimiter>,
    registry: Arc<PortalRegistry>,
    store: Arc<dyn InvoiceStore>,
    qr_decoder: Arc<dyn QrDecoder>,
    alerts: Arc<dyn OperatorAlerts>,
    clock: Arc<dyn Clock>,
}

/// Tracks progress of a single submission.
struct Progress {
    stages: Vec<SubmissionStage>,
}

impl Progress {
    fn start() -> Self {
        Self {
            stages: vec![SubmissionStage::Received],
        }
    }

    fn advance(&mut self, stage: SubmissionStage) {
        self.stages.push(stage);
    }

    fn reached(&self) -> SubmissionStage {
        self.stages
            .last()
            .copied()
            .unwrap_or(SubmissionStage::Received)
    }

    fn fail(&self, state: TerminalState, error: PipelineError) -> SubmissionFailure {
        SubmissionFailure {
            state,
            error,
            reached: self.reached(),
        }
    }

    fn acknowledge(mut self, record: &StoredRecord, duplicate: bool) -> Acknowledgment {
        self.advance(SubmissionStage::Stored);
        self.advance(SubmissionStage::Acknowledged);
        Acknowledgment {
            fingerprint: record.invoice.fingerprint.clone(),
            duplicate,
            invoice: InvoiceSummary::from(record),
            stages: self.stages,
        }
    }
}

impl SubmissionPipeline {
    /// Build a pipeline from its collaborators.
    pub fn new(
        gate: Arc<AccessControlGate>,
        limiter: Arc<RateLimiter>,
        registry: Arc<PortalRegistry>,
        ports: SubmissionPorts,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gate,
            limiter,
            registry,
            store: ports.store,
            qr_decoder: ports.qr_decoder,
            alerts: ports.alerts,
            clock,
        }
    }

    /// Run a submission for `user`.
    ///
    /// # Errors
    ///
    /// Returns a [`SubmissionFailure`] naming the terminal state and the
    /// cause. Storage failures are also escalated to operators.
    #[instrument(skip(self, input), fields(user_id = %user))]
    pub async fn submit(
        &self,
        user: UserId,
        input: SubmissionInput,
    ) -> Result<Acknowledgment, SubmissionFailure> {
        let mut progress = Progress::start();

        self.gate
            .authorize(user, Action::SubmitInvoice)
            .map_err(|error| progress.fail(TerminalState::Denied, error))?;
        progress.advance(SubmissionStage::Authorized);

        self.limiter
            .check(user, ActionClass::SubmitInvoice, None)
            .map_err(|error| progress.fail(TerminalState::Limited, error))?;
        progress.advance(SubmissionStage::RateLimitOk);

        let reference = self
            .resolve(input)
            .await
            .map_err(|error| progress.fail(TerminalState::InvalidRef, error))?;
        progress.advance(SubmissionStage::Resolved);

        match self.store.find_by_access_key(&reference.access_key).await {
            Ok(Some(existing)) => {
                info!(
                    fingerprint = %existing.invoice.fingerprint,
                    "access key already stored; skipping fetch"
                );
                return Ok(progress.acknowledge(&existing, true));
            }
            Ok(None) => {}
            Err(store_error) => {
                let error = self.escalate("find_by_access_key", store_error.to_string()).await;
                return Err(progress.fail(TerminalState::StoreFailed, error));
            }
        }

        let document = self
            .registry
            .fetch(&reference)
            .await
            .map_err(|error| progress.fail(TerminalState::FetchFailed, error))?;
        progress.advance(SubmissionStage::Fetched);

        let parsed = parse_document(&document, &reference)
            .map_err(|error| progress.fail(TerminalState::ParseFailed, error))?;
        progress.advance(SubmissionStage::Parsed);

        let (invoice, line_items) = parsed.into_records(user, self.clock.utc());
        let outcome = match self.store.put(invoice, line_items).await {
            Ok(outcome) => outcome,
            Err(store_error) => {
                let error = self.escalate("put", store_error.to_string()).await;
                return Err(progress.fail(TerminalState::StoreFailed, error));
            }
        };

        let duplicate = outcome.is_duplicate();
        let acknowledgment = progress.acknowledge(outcome.record(), duplicate);
        info!(
            fingerprint = %acknowledgment.fingerprint,
            duplicate,
            region = %reference.region,
            "invoice acknowledged"
        );
        Ok(acknowledgment)
    }

    async fn resolve(&self, input: SubmissionInput) -> Result<CanonicalReference, PipelineError> {
        let text = match input {
            SubmissionInput::Reference(text) => text,
            SubmissionInput::Photo(bytes) => {
                self.qr_decoder
                    .decode(&bytes)
                    .await
                    .map_err(|error| match error {
                        QrDecodeError::NotFound => {
                            PipelineError::invalid_reference("no QR code found in photo")
                        }
                        QrDecodeError::Decoder { message } => PipelineError::invalid_reference(
                            format!("photo could not be decoded: {message}"),
                        ),
                    })?
            }
        };
        resolve_reference(&text)
    }

    async fn escalate(&self, operation: &str, message: String) -> PipelineError {
        self.alerts
            .storage_failure(&StorageAlert {
                operation: operation.to_owned(),
                message: message.clone(),
            })
            .await;
        PipelineError::storage(message)
    }
}
