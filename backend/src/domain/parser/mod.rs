//! Invoice parser.
//!
//! Converts a fetched [`RawDocument`] into a [`ParsedInvoice`]. Format
//! specific extraction lives in [`html`] and [`xml`]; both produce
//! [`ExtractedFields`], which this module validates and completes with values
//! decoded from the access key.
//!
//! Issuer id, emission timestamp, declared total and at least one line item
//! are mandatory. Nothing is returned unless all of them are present.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::error::PipelineError;
use super::invoice::{InvoiceHeader, Issuer, ParsedInvoice, ParsedLineItem, Payment};
use super::money::round_cents;
use super::ports::{DocumentFormat, RawDocument};
use super::reference::CanonicalReference;

mod html;
mod xml;

/// Line-sum tolerance added to any declared discount.
pub const LINE_SUM_TOLERANCE: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

/// Fields found in a document before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    /// Issuer CNPJ, digits only.
    pub issuer_id: Option<String>,
    /// Issuer name.
    pub issuer_name: Option<String>,
    /// Issuer address.
    pub issuer_address: Option<String>,
    /// Document number.
    pub number: Option<u32>,
    /// Series.
    pub series: Option<u16>,
    /// Emission timestamp.
    pub emitted_at: Option<DateTime<Utc>>,
    /// Declared total.
    pub total: Option<Decimal>,
    /// Declared discount.
    pub discount: Option<Decimal>,
    /// Amount to pay.
    pub amount_paid: Option<Decimal>,
    /// Approximate tax burden.
    pub taxes: Option<Decimal>,
    /// Payment breakdown.
    pub payments: Vec<Payment>,
    /// Authorisation protocol.
    pub protocol: Option<String>,
    /// Consumer line.
    pub consumer: Option<String>,
    /// Product rows.
    pub items: Vec<ExtractedItem>,
}

/// Product row before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedItem {
    /// Description.
    pub description: String,
    /// Product code.
    pub code: Option<String>,
    /// Quantity.
    pub quantity: Option<Decimal>,
    /// Unit of measure.
    pub unit: Option<String>,
    /// Unit price.
    pub unit_price: Option<Decimal>,
    /// Line total.
    pub total: Option<Decimal>,
    /// Category.
    pub category: Option<String>,
}

/// Parse `document`, fetched for `reference`.
///
/// # Errors
///
/// Returns [`PipelineError::ParseError`] naming the first mandatory field
/// that is missing (`issuer_id`, `emitted_at`, `total`, `line_items`).
pub fn parse_document(
    document: &RawDocument,
    reference: &CanonicalReference,
) -> Result<ParsedInvoice, PipelineError> {
    let fields = match document.format {
        DocumentFormat::Html => html::extract(&document.body),
        DocumentFormat::Xml => xml::extract(&document.body),
    };
    debug!(
        format = ?document.format,
        items = fields.items.len(),
        "document fields extracted"
    );
    build_invoice(fields, reference, &document.source_url)
}

/// Validate extracted fields and complete them from the reference.
pub fn build_invoice(
    fields: ExtractedFields,
    reference: &CanonicalReference,
    source_url: &str,
) -> Result<ParsedInvoice, PipelineError> {
    let key = &reference.access_key;
    let issuer_id = fields
        .issuer_id
        .filter(|id| id.len() == 14)
        .or_else(|| Some(key.issuer_cnpj().to_owned()))
        .filter(|id| id.chars().any(|c| c != '0'))
        .ok_or_else(|| PipelineError::parse("issuer_id"))?;
    let emitted_at = fields
        .emitted_at
        .or(reference.declared_emission)
        .ok_or_else(|| PipelineError::parse("emitted_at"))?;
    let total = fields.total.ok_or_else(|| PipelineError::parse("total"))?;

    let line_items: Vec<ParsedLineItem> = fields
        .items
        .into_iter()
        .filter_map(complete_item)
        .collect();
    if line_items.is_empty() {
        return Err(PipelineError::parse("line_items"));
    }

    check_line_sum(&line_items, total, fields.discount);

    let header = InvoiceHeader {
        region: reference.region,
        access_key: key.clone(),
        model: reference.model,
        issuer: Issuer {
            id: issuer_id,
            name: fields.issuer_name,
            address: fields.issuer_address,
        },
        number: fields.number.unwrap_or_else(|| key.number()),
        series: fields.series.unwrap_or_else(|| key.series()),
        emitted_at,
        total,
        discount: fields.discount,
        amount_paid: fields.amount_paid,
        taxes: fields.taxes,
        payments: fields.payments,
        protocol: fields.protocol,
        consumer: fields.consumer,
        source_url: source_url.to_owned(),
    };
    Ok(ParsedInvoice { header, line_items })
}

fn complete_item(item: ExtractedItem) -> Option<ParsedLineItem> {
    let description = item.description.trim().to_owned();
    if description.is_empty() {
        return None;
    }
    let total = match (item.total, item.quantity, item.unit_price) {
        (Some(total), _, _) => total,
        (None, Some(quantity), Some(price)) => match quantity.checked_mul(price) {
            Some(product) => round_cents(product),
            None => {
                warn!(%description, %quantity, %price, "line total overflows; item dropped");
                return None;
            }
        },
        _ => return None,
    };
    let quantity = item.quantity.unwrap_or(Decimal::ONE);
    let unit_price = item
        .unit_price
        .or_else(|| total.checked_div(quantity).map(round_cents))
        .unwrap_or(total);
    Some(ParsedLineItem {
        description,
        code: item.code,
        quantity,
        unit: item.unit,
        unit_price,
        total,
        category: item.category,
    })
}

fn check_line_sum(items: &[ParsedLineItem], total: Decimal, discount: Option<Decimal>) {
    let sum = items
        .iter()
        .try_fold(Decimal::ZERO, |sum, item| sum.checked_add(item.total));
    let tolerance = LINE_SUM_TOLERANCE.saturating_add(discount.unwrap_or_default().abs());
    match sum.and_then(|sum| sum.checked_sub(total).map(|gap| (sum, gap))) {
        Some((sum, gap)) if gap.abs() > tolerance => {
            warn!(%sum, %total, %tolerance, "line item totals disagree with declared total");
        }
        Some(_) => {}
        None => warn!(%total, "line item totals overflow; sum not checked"),
    }
}

pub(crate) fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| {
        Regex::new(pattern)
            .unwrap_or_else(|error| panic!("document regex failed to compile: {error}"))
    })
}
