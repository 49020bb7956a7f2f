//! Driven port for fetching invoice documents from a regional tax portal.
//!
//! Each adapter serves one region and owns its request construction and
//! response shape. The registry in [`crate::domain::PortalRegistry`] selects
//! the adapter and applies the retry policy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::define_port_error;
use crate::domain::{CanonicalReference, Region};

/// Wire format of a fetched document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    /// Public consultation HTML page.
    Html,
    /// `nfeProc` / `NFe` XML document.
    Xml,
}

/// Document returned by a portal adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    /// Region that served the document.
    pub region: Region,
    /// Body format.
    pub format: DocumentFormat,
    /// Decoded body text.
    pub body: String,
    /// URL that was requested.
    pub source_url: String,
}

define_port_error! {
    /// Errors surfaced while calling a portal.
    pub enum PortalFetchError {
        /// Network transport failed before a complete response arrived.
        Transport { message: String } => "portal transport failed: {message}",
        /// Request exceeded its timeout budget.
        Timeout { message: String } => "portal timeout: {message}",
        /// Portal throttled the request.
        RateLimited { message: String } => "portal rate limited request: {message}",
        /// Portal rejected the request (4xx).
        Rejected { message: String } => "portal rejected request: {message}",
        /// Response was empty or not a document.
        Malformed { message: String } => "portal response malformed: {message}",
    }
}

impl PortalFetchError {
    /// Return whether retrying this error is expected to help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::RateLimited { .. }
        )
    }
}

/// Port for one region's document portal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PortalAdapter: Send + Sync {
    /// Region served by this adapter.
    fn region(&self) -> Region;

    /// Fetch the document identified by `reference`.
    async fn fetch(&self, reference: &CanonicalReference) -> Result<RawDocument, PortalFetchError>;
}

/// Fixture adapter returning a fixed body for its region.
#[derive(Debug, Clone)]
pub struct FixturePortalAdapter {
    region: Region,
    format: DocumentFormat,
    body: String,
}

impl FixturePortalAdapter {
    /// Serve `body` for every reference in `region`.
    pub fn new(region: Region, format: DocumentFormat, body: impl Into<String>) -> Self {
        Self {
            region,
            format,
            body: body.into(),
        }
    }
}

#[async_trait]
impl PortalAdapter for FixturePortalAdapter {
    fn region(&self) -> Region {
        self.region
    }

    async fn fetch(&self, reference: &CanonicalReference) -> Result<RawDocument, PortalFetchError> {
        Ok(RawDocument {
            region: self.region,
            format: self.format,
            body: self.body.clone(),
            source_url: reference.canonical_url().to_string(),
        })
    }
}
