//! Report aggregation over stored invoices.
//!
//! A report covers the window `(now - period, now]` over emission timestamps
//! and groups the matching records by day, category, issuer, product and
//! payment method. Rendering is left to a [`crate::domain::ports::ReportRenderer`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, TimeDelta, Utc};
use mockable::Clock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::error::PipelineError;
use super::invoice::{PaymentMethod, StoredRecord};
use super::money::round_cents;
use super::ports::{InvoiceStore, RecordSet, TimeRange};
use super::reference::PORTAL_LOCAL_OFFSET_SECS;
use super::user::UserId;

const TOP_ISSUERS: usize = 8;
const TOP_PRODUCTS: usize = 15;
const UNCATEGORISED: &str = "uncategorised";

/// Report window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportPeriod {
    /// One day.
    Day,
    /// Seven days.
    Week,
    /// Fifteen days.
    Biweek,
    /// Thirty days.
    Month,
}

impl ReportPeriod {
    /// Every period, shortest first.
    pub const ALL: [Self; 4] = [Self::Day, Self::Week, Self::Biweek, Self::Month];

    /// Window length in days.
    pub const fn days(self) -> i64 {
        match self {
            Self::Day => 1,
            Self::Week => 7,
            Self::Biweek => 15,
            Self::Month => 30,
        }
    }

    /// Canonical name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Biweek => "biweek",
            Self::Month => "month",
        }
    }
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unrecognised period name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown report period: {0}")]
pub struct UnknownPeriod(pub String);

impl FromStr for ReportPeriod {
    type Err = UnknownPeriod;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "day" | "dia" | "daily" | "diario" | "diário" => Ok(Self::Day),
            "week" | "semana" | "weekly" | "semanal" => Ok(Self::Week),
            "biweek" | "quinzena" | "biweekly" | "quinzenal" => Ok(Self::Biweek),
            "month" | "mes" | "mês" | "monthly" | "mensal" => Ok(Self::Month),
            other => Err(UnknownPeriod(other.to_owned())),
        }
    }
}

/// Which submissions a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "user")]
pub enum ReportScope {
    /// Every stored invoice.
    All,
    /// Invoices first submitted by one user.
    SubmittedBy(UserId),
}

impl ReportScope {
    /// Whether `record` belongs to this scope.
    pub fn includes(self, record: &StoredRecord) -> bool {
        match self {
            Self::All => true,
            Self::SubmittedBy(user) => record.invoice.submitted_by == user,
        }
    }
}

/// One labelled value of a grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRow {
    /// Group label.
    pub label: String,
    /// Group total.
    pub value: Decimal,
}

/// Per-issuer grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerRow {
    /// Issuer CNPJ.
    pub id: String,
    /// Issuer name, when known.
    pub name: Option<String>,
    /// Invoices from this issuer.
    pub invoice_count: usize,
    /// Sum of declared totals.
    pub total: Decimal,
}

/// Per-product grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRow {
    /// Issuer's product code, when printed.
    pub code: Option<String>,
    /// Description of the first line seen.
    pub description: String,
    /// Summed quantity.
    pub quantity: Decimal,
    /// Line items naming this product.
    pub occurrences: usize,
    /// Summed line totals.
    pub total: Decimal,
}

/// Structured report, ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Requested period.
    pub period: ReportPeriod,
    /// Requested scope.
    pub scope: ReportScope,
    /// Exclusive window start.
    pub window_start: DateTime<Utc>,
    /// Inclusive window end.
    pub window_end: DateTime<Utc>,
    /// Invoices in the window.
    pub invoice_count: usize,
    /// Distinct submitting users.
    pub submitter_count: usize,
    /// Sum of declared totals.
    pub grand_total: Decimal,
    /// Sum of declared discounts.
    pub total_discount: Decimal,
    /// Sum of amounts paid, falling back to the total when not printed.
    pub total_paid: Decimal,
    /// Totals per emission day, chronological.
    pub by_day: Vec<SummaryRow>,
    /// Line totals per category, largest first.
    pub by_category: Vec<SummaryRow>,
    /// Busiest issuers, most invoices first.
    pub by_issuer: Vec<IssuerRow>,
    /// Products with the largest spend.
    pub top_products: Vec<ProductRow>,
    /// Amounts per payment method, largest first.
    pub payment_methods: Vec<SummaryRow>,
}

impl ReportSummary {
    /// Whether the window held no invoices.
    pub fn is_empty(&self) -> bool {
        self.invoice_count == 0
    }
}

/// Window `(now - period, now]`.
pub fn report_window(period: ReportPeriod, now: DateTime<Utc>) -> TimeRange {
    TimeRange {
        start: now - TimeDelta::days(period.days()),
        end: now,
    }
}

fn portal_offset() -> FixedOffset {
    FixedOffset::east_opt(PORTAL_LOCAL_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

fn local_day(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&portal_offset()).date_naive()
}

/// Build a summary from records already selected for the window.
///
/// Records outside `scope` or the window are ignored, so callers may pass a
/// wider set.
pub fn summarize(
    records: &RecordSet,
    period: ReportPeriod,
    scope: ReportScope,
    now: DateTime<Utc>,
) -> ReportSummary {
    let window = report_window(period, now);
    let mut invoice_count = 0_usize;
    let mut submitters = BTreeSet::new();
    let mut grand_total = Decimal::ZERO;
    let mut total_discount = Decimal::ZERO;
    let mut total_paid = Decimal::ZERO;
    let mut days: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
    let mut categories: HashMap<String, Decimal> = HashMap::new();
    let mut issuers: HashMap<String, IssuerRow> = HashMap::new();
    let mut products: HashMap<String, ProductRow> = HashMap::new();
    let mut payments: HashMap<PaymentMethod, Decimal> = HashMap::new();

    for record in records
        .iter()
        .filter(|record| scope.includes(record))
        .filter(|record| window.contains(record.invoice.header.emitted_at))
    {
        let header = &record.invoice.header;
        invoice_count += 1;
        submitters.insert(record.invoice.submitted_by);
        accumulate(&mut grand_total, header.total);
        accumulate(&mut total_discount, header.discount.unwrap_or_default());
        accumulate(&mut total_paid, header.amount_paid.unwrap_or(header.total));
        accumulate(days.entry(local_day(header.emitted_at)).or_default(), header.total);

        let issuer = issuers
            .entry(header.issuer.id.clone())
            .or_insert_with(|| IssuerRow {
                id: header.issuer.id.clone(),
                name: None,
                invoice_count: 0,
                total: Decimal::ZERO,
            });
        issuer.invoice_count += 1;
        accumulate(&mut issuer.total, header.total);
        if issuer.name.is_none() {
            issuer.name.clone_from(&header.issuer.name);
        }

        for item in &record.line_items {
            let category = item
                .category
                .clone()
                .unwrap_or_else(|| UNCATEGORISED.to_owned());
            accumulate(categories.entry(category).or_default(), item.total);
            let product = products
                .entry(product_key(item.code.as_deref(), &item.description))
                .or_insert_with(|| ProductRow {
                    code: item.code.clone().filter(|code| !code.trim().is_empty()),
                    description: item.description.clone(),
                    quantity: Decimal::ZERO,
                    occurrences: 0,
                    total: Decimal::ZERO,
                });
            product.occurrences += 1;
            accumulate(&mut product.quantity, item.quantity);
            accumulate(&mut product.total, item.total);
        }

        let single_payment = header.payments.len() == 1;
        for payment in &header.payments {
            let amount = match payment.amount {
                Some(amount) => amount,
                None if single_payment => header.amount_paid.unwrap_or(header.total),
                None => Decimal::ZERO,
            };
            accumulate(payments.entry(payment.method).or_default(), amount);
        }
    }

    let by_day = days
        .into_iter()
        .map(|(day, value)| SummaryRow {
            label: day.format("%Y-%m-%d").to_string(),
            value: round_cents(value),
        })
        .collect();

    let mut by_issuer: Vec<IssuerRow> = issuers.into_values().collect();
    by_issuer.sort_by(|a, b| {
        b.invoice_count
            .cmp(&a.invoice_count)
            .then_with(|| b.total.cmp(&a.total))
            .then_with(|| a.id.cmp(&b.id))
    });
    by_issuer.truncate(TOP_ISSUERS);
    for issuer in &mut by_issuer {
        issuer.total = round_cents(issuer.total);
    }

    let mut top_products: Vec<ProductRow> = products.into_values().collect();
    top_products.sort_by(|a, b| {
        b.total
            .cmp(&a.total)
            .then_with(|| b.occurrences.cmp(&a.occurrences))
            .then_with(|| a.description.cmp(&b.description))
    });
    top_products.truncate(TOP_PRODUCTS);
    for product in &mut top_products {
        product.total = round_cents(product.total);
    }

    let summary = ReportSummary {
        period,
        scope,
        window_start: window.start,
        window_end: window.end,
        invoice_count,
        submitter_count: submitters.len(),
        grand_total: round_cents(grand_total),
        total_discount: round_cents(total_discount),
        total_paid: round_cents(total_paid),
        by_day,
        by_category: ranked(categories),
        by_issuer,
        top_products,
        payment_methods: ranked(
            payments
                .into_iter()
                .map(|(method, value)| (method.label().to_owned(), value))
                .collect(),
        ),
    };
    debug!(
        %period,
        invoice_count = summary.invoice_count,
        grand_total = %summary.grand_total,
        "report summarised"
    );
    summary
}

fn accumulate(slot: &mut Decimal, amount: Decimal) {
    *slot = slot.saturating_add(amount);
}

/// Products group by issuer code when printed, by description otherwise.
fn product_key(code: Option<&str>, description: &str) -> String {
    match code.map(str::trim).filter(|code| !code.is_empty()) {
        Some(code) => format!("code:{code}"),
        None => format!("desc:{}", description.trim().to_uppercase()),
    }
}

fn ranked(groups: HashMap<String, Decimal>) -> Vec<SummaryRow> {
    let mut rows: Vec<SummaryRow> = groups
        .into_iter()
        .map(|(label, value)| SummaryRow {
            label,
            value: round_cents(value),
        })
        .collect();
    rows.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.label.cmp(&b.label)));
    rows
}

/// Reads stored invoices and builds [`ReportSummary`] values.
#[derive(Clone)]
pub struct ReportAggregator {
    store: Arc<dyn InvoiceStore>,
    clock: Arc<dyn Clock>,
}

impl ReportAggregator {
    /// Build an aggregator over `store`.
    pub fn new(store: Arc<dyn InvoiceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Aggregate the window ending now.
    pub async fn aggregate(
        &self,
        period: ReportPeriod,
        scope: ReportScope,
    ) -> Result<ReportSummary, PipelineError> {
        self.aggregate_at(period, scope, self.clock.utc()).await
    }

    /// Aggregate the window ending at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StorageError`] when the store query fails.
    #[instrument(skip(self), fields(%period))]
    pub async fn aggregate_at(
        &self,
        period: ReportPeriod,
        scope: ReportScope,
        now: DateTime<Utc>,
    ) -> Result<ReportSummary, PipelineError> {
        let records = self
            .store
            .query(report_window(period, now), scope)
            .await
            .map_err(|error| PipelineError::storage(error.to_string()))?;
        Ok(summarize(&records, period, scope, now))
    }

    /// Number of invoices in the store, whatever their emission date.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StorageError`] when the store cannot count.
    pub async fn stored_invoices(&self) -> Result<usize, PipelineError> {
        self.store
            .count()
            .await
            .map_err(|error| PipelineError::storage(error.to_string()))
    }
}
