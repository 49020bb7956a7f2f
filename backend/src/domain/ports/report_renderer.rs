//! External collaborator that renders report summaries into artifacts.

use async_trait::async_trait;
use serde::Serialize;

use super::define_port_error;
use crate::domain::ReportSummary;

/// Rendered report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedReport {
    /// IANA media type of `bytes`.
    pub media_type: String,
    /// Artifact content.
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

define_port_error! {
    /// Errors raised while rendering.
    pub enum ReportRenderError {
        /// Renderer failed.
        Render { message: String } => "report rendering failed: {message}",
    }
}

/// Port for report rendering (`render(summary) -> artifact`).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    /// Render `summary`.
    async fn render(&self, summary: &ReportSummary) -> Result<RenderedReport, ReportRenderError>;
}

/// Fixture renderer emitting the summary as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureReportRenderer;

#[async_trait]
impl ReportRenderer for FixtureReportRenderer {
    async fn render(&self, summary: &ReportSummary) -> Result<RenderedReport, ReportRenderError> {
        let bytes = serde_json::to_vec(summary)
            .map_err(|error| ReportRenderError::render(error.to_string()))?;
        Ok(RenderedReport {
            media_type: "application/json".to_owned(),
            bytes,
        })
    }
}
