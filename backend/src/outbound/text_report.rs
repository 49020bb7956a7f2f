//! Plain-text report renderer.

use std::fmt::Write as _;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::ports::{RenderedReport, ReportRenderError, ReportRenderer};
use crate::domain::{ReportScope, ReportSummary, SummaryRow};

/// Renders summaries as an aligned UTF-8 text document.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextReportRenderer;

impl TextReportRenderer {
    /// Render `summary` into text.
    ///
    /// # Errors
    ///
    /// Returns [`ReportRenderError::Render`] if formatting fails.
    pub fn render_text(summary: &ReportSummary) -> Result<String, ReportRenderError> {
        let mut out = String::new();
        write_summary(&mut out, summary)
            .map_err(|error| ReportRenderError::render(error.to_string()))?;
        Ok(out)
    }
}

fn write_summary(out: &mut String, summary: &ReportSummary) -> std::fmt::Result {
    let scope = match summary.scope {
        ReportScope::All => "all submissions".to_owned(),
        ReportScope::SubmittedBy(user) => format!("submissions by {user}"),
    };
    writeln!(out, "Invoice report ({}, {scope})", summary.period)?;
    writeln!(
        out,
        "Window: {} .. {}",
        summary.window_start.format("%Y-%m-%d %H:%M UTC"),
        summary.window_end.format("%Y-%m-%d %H:%M UTC")
    )?;
    if summary.is_empty() {
        return writeln!(out, "No invoices in this window.");
    }
    writeln!(
        out,
        "Invoices: {}  Submitters: {}",
        summary.invoice_count, summary.submitter_count
    )?;
    writeln!(out, "Total: {}", money(summary.grand_total))?;
    writeln!(out, "Discounts: {}", money(summary.total_discount))?;
    writeln!(out, "Paid: {}", money(summary.total_paid))?;

    section(out, "By day", &summary.by_day)?;
    section(out, "By category", &summary.by_category)?;
    writeln!(out, "\nIssuers")?;
    for issuer in &summary.by_issuer {
        writeln!(
            out,
            "  {:<40} {:>4}  {:>12}",
            issuer.name.as_deref().unwrap_or(&issuer.id),
            issuer.invoice_count,
            money(issuer.total)
        )?;
    }
    if !summary.top_products.is_empty() {
        writeln!(out, "\nTop products")?;
        for product in &summary.top_products {
            writeln!(
                out,
                "  {:<40} {:>4}x {:>8} {:>12}",
                product.description,
                product.occurrences,
                product.quantity.normalize(),
                money(product.total)
            )?;
        }
    }
    section(out, "Payment methods", &summary.payment_methods)
}

fn section(out: &mut String, title: &str, rows: &[SummaryRow]) -> std::fmt::Result {
    if rows.is_empty() {
        return Ok(());
    }
    writeln!(out, "\n{title}")?;
    for row in rows {
        writeln!(out, "  {:<40} {:>12}", row.label, money(row.value))?;
    }
    Ok(())
}

fn money(value: Decimal) -> String {
    format!("R$ {:.2}", value)
}

#[async_trait]
impl ReportRenderer for TextReportRenderer {
    async fn render(&self, summary: &ReportSummary) -> Result<RenderedReport, ReportRenderError> {
        let text = Self::render_text(summary)?;
        Ok(RenderedReport {
            media_type: "text/plain; charset=utf-8".to_owned(),
            bytes: text.into_bytes(),
        })
    }
}
