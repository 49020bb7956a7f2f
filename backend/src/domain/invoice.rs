//! Invoice and line-item records.
//!
//! Records are immutable once built. The [`Fingerprint`] is derived from the
//! issuer, document number, series and emission timestamp, so the same
//! document yields the same fingerprint however it was submitted.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::reference::{AccessKey, InvoiceModel, Region};
use super::user::UserId;

/// Deterministic invoice identifier (hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint of a document.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use invoice_backend::domain::Fingerprint;
    ///
    /// let at = Utc.with_ymd_and_hms(2024, 10, 5, 13, 15, 0).single().expect("valid");
    /// let a = Fingerprint::derive("12345678000190", 1234, 1, at);
    /// let b = Fingerprint::derive("12345678000190", 1234, 1, at);
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str().len(), 64);
    /// ```
    pub fn derive(issuer_id: &str, number: u32, series: u16, emitted_at: DateTime<Utc>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(issuer_id.as_bytes());
        hasher.update(b"|");
        hasher.update(number.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(series.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(
            emitted_at
                .to_rfc3339_opts(SecondsFormat::Secs, true)
                .as_bytes(),
        );
        Self(hex::encode(hasher.finalize()))
    }

    /// Hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalised payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Cartão de crédito.
    CreditCard,
    /// Cartão de débito.
    DebitCard,
    /// Pix instant transfer.
    Pix,
    /// Dinheiro.
    Cash,
    /// Meal or food vouchers.
    Voucher,
    /// Anything else.
    Other,
}

impl PaymentMethod {
    /// Classify a label printed by a portal.
    pub fn classify(label: &str) -> Self {
        let lower = label.to_lowercase();
        if lower.contains("crédito") || lower.contains("credito") {
            Self::CreditCard
        } else if lower.contains("débito") || lower.contains("debito") {
            Self::DebitCard
        } else if lower.contains("pix") {
            Self::Pix
        } else if lower.contains("dinheiro") {
            Self::Cash
        } else if lower.contains("vale") {
            Self::Voucher
        } else {
            Self::Other
        }
    }

    /// Map an NF-e `tPag` code.
    pub fn from_tpag(code: &str) -> Self {
        match code.trim() {
            "01" => Self::Cash,
            "03" => Self::CreditCard,
            "04" => Self::DebitCard,
            "10" | "11" | "12" | "13" => Self::Voucher,
            "17" => Self::Pix,
            _ => Self::Other,
        }
    }

    /// Human label used in reports.
    pub const fn label(self) -> &'static str {
        match self {
            Self::CreditCard => "credit card",
            Self::DebitCard => "debit card",
            Self::Pix => "pix",
            Self::Cash => "cash",
            Self::Voucher => "voucher",
            Self::Other => "other",
        }
    }
}

/// One payment line of an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Normalised method.
    pub method: PaymentMethod,
    /// Amount paid with this method, when printed.
    pub amount: Option<Decimal>,
}

/// Issuing company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    /// CNPJ, 14 digits without punctuation.
    pub id: String,
    /// Trade name.
    pub name: Option<String>,
    /// Street address.
    pub address: Option<String>,
}

/// Fields extracted from a portal document, before submission metadata is
/// attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceHeader {
    /// Issuing region.
    pub region: Region,
    /// Access key.
    pub access_key: AccessKey,
    /// Document model.
    pub model: InvoiceModel,
    /// Issuer.
    pub issuer: Issuer,
    /// Document number.
    pub number: u32,
    /// Series.
    pub series: u16,
    /// Emission timestamp.
    pub emitted_at: DateTime<Utc>,
    /// Declared total.
    pub total: Decimal,
    /// Declared discount.
    pub discount: Option<Decimal>,
    /// Amount actually paid.
    pub amount_paid: Option<Decimal>,
    /// Approximate tax burden.
    pub taxes: Option<Decimal>,
    /// Payment breakdown.
    pub payments: Vec<Payment>,
    /// Authorisation protocol number.
    pub protocol: Option<String>,
    /// Consumer identification line.
    pub consumer: Option<String>,
    /// Canonical portal URL the document came from.
    pub source_url: String,
}

/// Line item extracted from a portal document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLineItem {
    /// Product description.
    pub description: String,
    /// Issuer's product code.
    pub code: Option<String>,
    /// Quantity.
    pub quantity: Decimal,
    /// Unit of measure.
    pub unit: Option<String>,
    /// Unit price.
    pub unit_price: Decimal,
    /// Line total.
    pub total: Decimal,
    /// Product category (NCM chapter when known).
    pub category: Option<String>,
}

/// Parser output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedInvoice {
    /// Header fields.
    pub header: InvoiceHeader,
    /// At least one line item.
    pub line_items: Vec<ParsedLineItem>,
}

impl ParsedInvoice {
    /// Fingerprint of the parsed document.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::derive(
            &self.header.issuer.id,
            self.header.number,
            self.header.series,
            self.header.emitted_at,
        )
    }

    /// Attach submission metadata, producing storable records.
    pub fn into_records(
        self,
        submitted_by: UserId,
        stored_at: DateTime<Utc>,
    ) -> (Invoice, Vec<LineItem>) {
        let fingerprint = self.fingerprint();
        let items = self
            .line_items
            .into_iter()
            .map(|item| LineItem {
                fingerprint: fingerprint.clone(),
                description: item.description,
                code: item.code,
                quantity: item.quantity,
                unit: item.unit,
                unit_price: item.unit_price,
                total: item.total,
                category: item.category,
            })
            .collect();
        let invoice = Invoice {
            fingerprint,
            header: self.header,
            submitted_by,
            stored_at,
        };
        (invoice, items)
    }
}

/// Stored invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Deterministic identifier.
    pub fingerprint: Fingerprint,
    /// Extracted document fields.
    pub header: InvoiceHeader,
    /// First submitter.
    pub submitted_by: UserId,
    /// Commit timestamp.
    pub stored_at: DateTime<Utc>,
}

/// Stored line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Owning invoice.
    pub fingerprint: Fingerprint,
    /// Product description.
    pub description: String,
    /// Issuer's product code.
    pub code: Option<String>,
    /// Quantity.
    pub quantity: Decimal,
    /// Unit of measure.
    pub unit: Option<String>,
    /// Unit price.
    pub unit_price: Decimal,
    /// Line total.
    pub total: Decimal,
    /// Product category.
    pub category: Option<String>,
}

/// Invoice together with its line items, as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Invoice row.
    pub invoice: Invoice,
    /// Line item rows.
    pub line_items: Vec<LineItem>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[test]
    fn fingerprint_changes_with_each_component() {
        let at = Utc
            .with_ymd_and_hms(2024, 10, 5, 13, 15, 0)
            .single()
            .expect("valid time");
        let base = Fingerprint::derive("12345678000190", 10, 1, at);
        assert_ne!(base, Fingerprint::derive("12345678000191", 10, 1, at));
        assert_ne!(base, Fingerprint::derive("12345678000190", 11, 1, at));
        assert_ne!(base, Fingerprint::derive("12345678000190", 10, 2, at));
        assert_ne!(
            base,
            Fingerprint::derive("12345678000190", 10, 1, at + chrono::TimeDelta::seconds(1))
        );
    }

    #[rstest]
    #[case("Cartão de Crédito", PaymentMethod::CreditCard)]
    #[case("Cartao de Debito", PaymentMethod::DebitCard)]
    #[case("PIX", PaymentMethod::Pix)]
    #[case("Dinheiro", PaymentMethod::Cash)]
    #[case("Vale Alimentação", PaymentMethod::Voucher)]
    #[case("Boleto", PaymentMethod::Other)]
    fn classifies_payment_labels(#[case] label: &str, #[case] expected: PaymentMethod) {
        assert_eq!(PaymentMethod::classify(label), expected);
    }
}
