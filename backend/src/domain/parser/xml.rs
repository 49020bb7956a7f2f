//! Extraction from `nfeProc` / `NFe` XML documents.
//!
//! NF-e documents are flat and schema-fixed, so fields are located by
//! element name inside their parent block rather than through a general
//! XML tree.

use rust_decimal::Decimal;

use super::html::decode_entities;
use super::{ExtractedFields, ExtractedItem};
use crate::domain::invoice::{Payment, PaymentMethod};
use crate::domain::money::parse_amount;
use crate::domain::reference::parse_declared_emission;

/// Extract fields from an NF-e XML document.
pub fn extract(body: &str) -> ExtractedFields {
    let mut fields = ExtractedFields::default();

    if let Some(emit) = first_block(body, "emit") {
        fields.issuer_id = leaf(emit, "CNPJ")
            .map(|id| id.chars().filter(char::is_ascii_digit).collect());
        fields.issuer_name = leaf(emit, "xNome").or_else(|| leaf(emit, "xFant"));
        fields.issuer_address = first_block(emit, "enderEmit").map(address);
    }

    if let Some(ide) = first_block(body, "ide") {
        fields.number = leaf(ide, "nNF").and_then(|raw| raw.parse().ok());
        fields.series = leaf(ide, "serie").and_then(|raw| raw.parse().ok());
        fields.emitted_at = leaf(ide, "dhEmi")
            .or_else(|| leaf(ide, "dEmi"))
            .and_then(|raw| parse_declared_emission(&raw));
    }

    if let Some(totals) = first_block(body, "ICMSTot") {
        fields.total = amount(totals, "vNF");
        fields.discount = amount(totals, "vDesc");
        fields.taxes = amount(totals, "vTotTrib");
    }

    fields.items = blocks(body, "det")
        .into_iter()
        .filter_map(|det| first_block(det, "prod"))
        .map(product)
        .collect();

    fields.payments = blocks(body, "detPag")
        .into_iter()
        .map(|payment| Payment {
            method: leaf(payment, "tPag")
                .map_or(PaymentMethod::Other, |code| PaymentMethod::from_tpag(&code)),
            amount: amount(payment, "vPag"),
        })
        .collect();
    if !fields.payments.is_empty() {
        let change = first_block(body, "pag")
            .and_then(|pag| amount(pag, "vTroco"))
            .unwrap_or_default();
        fields.amount_paid = fields
            .payments
            .iter()
            .filter_map(|p| p.amount)
            .try_fold(Decimal::ZERO, Decimal::checked_add)
            .and_then(|paid| paid.checked_sub(change));
    }

    fields.protocol = first_block(body, "infProt").and_then(|prot| leaf(prot, "nProt"));
    fields.consumer = first_block(body, "dest").and_then(|dest| {
        leaf(dest, "xNome")
            .or_else(|| leaf(dest, "CPF").map(|cpf| format!("CPF {cpf}")))
            .or_else(|| leaf(dest, "CNPJ").map(|cnpj| format!("CNPJ {cnpj}")))
    });

    fields
}

fn product(prod: &str) -> ExtractedItem {
    ExtractedItem {
        description: leaf(prod, "xProd").unwrap_or_default(),
        code: leaf(prod, "cProd"),
        quantity: amount(prod, "qCom"),
        unit: leaf(prod, "uCom"),
        unit_price: amount(prod, "vUnCom"),
        total: amount(prod, "vProd"),
        category: leaf(prod, "NCM")
            .filter(|ncm| ncm.len() >= 2)
            .and_then(|ncm| ncm.get(..2).map(|chapter| format!("NCM {chapter}"))),
    }
}

fn address(ender: &str) -> String {
    ["xLgr", "nro", "xBairro", "xMun", "UF"]
        .iter()
        .filter_map(|tag| leaf(ender, tag))
        .collect::<Vec<_>>()
        .join(", ")
}

fn amount(block: &str, tag: &str) -> Option<Decimal> {
    leaf(block, tag).and_then(|raw| parse_amount(&raw))
}

/// Text content of the first `<tag>` element in `block`.
fn leaf(block: &str, tag: &str) -> Option<String> {
    first_block(block, tag)
        .map(|inner| decode_entities(inner.trim()))
        .filter(|text| !text.is_empty())
}

fn first_block<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    BlockIter::new(xml, tag).next()
}

fn blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    BlockIter::new(xml, tag).collect()
}

/// Iterates over the inner text of successive `<tag ...>...</tag>` elements.
struct BlockIter<'a> {
    rest: &'a str,
    open: String,
    close: String,
}

impl<'a> BlockIter<'a> {
    fn new(xml: &'a str, tag: &str) -> Self {
        Self {
            rest: xml,
            open: format!("<{tag}"),
            close: format!("</{tag}>"),
        }
    }
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let start = self.rest.find(&self.open)?;
            let after_name = &self.rest[start + self.open.len()..];
            // `<det` must not match `<detPag`.
            if !matches!(
                after_name.chars().next(),
                Some('>' | ' ' | '\t' | '\n' | '\r')
            ) {
                self.rest = after_name;
                continue;
            }
            let tag_end = after_name.find('>')?;
            if after_name[..tag_end].ends_with('/') {
                self.rest = &after_name[tag_end + 1..];
                continue;
            }
            let content = &after_name[tag_end + 1..];
            let end = content.find(&self.close)?;
            self.rest = &content[end + self.close.len()..];
            return Some(&content[..end]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SampleDocument;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    #[test]
    fn extracts_sample_document() {
        let fields = extract(&SampleDocument::default().xml());
        assert_eq!(fields.issuer_id.as_deref(), Some("12345678000190"));
        assert_eq!(fields.issuer_name.as_deref(), Some("MERCADO EXEMPLO LTDA"));
        assert_eq!(fields.number, Some(1234));
        assert_eq!(fields.series, Some(1));
        assert_eq!(
            fields.emitted_at,
            Utc.with_ymd_and_hms(2024, 10, 5, 13, 15, 0).single()
        );
        assert_eq!(fields.total, Some(dec!(29.90)));
        assert_eq!(fields.amount_paid, Some(dec!(29.90)));
        assert_eq!(fields.protocol.as_deref(), Some("135240000000001"));
        assert_eq!(fields.items.len(), 2);
        assert_eq!(fields.items[1].description, "PAO FRANCES KG");
        assert_eq!(fields.items[1].quantity, Some(dec!(0.5)));
        assert_eq!(
            fields.payments.first().map(|p| p.method),
            Some(PaymentMethod::DebitCard)
        );
    }

    #[test]
    fn overflowing_payments_leave_amount_paid_unset() {
        let huge = "79228162514264337593543950335";
        let xml = format!(
            "<pag><detPag><tPag>01</tPag><vPag>{huge}</vPag></detPag><detPag><tPag>03</tPag><vPag>{huge}</vPag></detPag></pag>"
        );
        let fields = extract(&xml);
        assert_eq!(fields.payments.len(), 2);
        assert_eq!(fields.amount_paid, None);
    }

    #[test]
    fn blocks_skip_similarly_named_and_self_closing_elements() {
        let xml = "<detPag><tPag>17</tPag></detPag><det nItem=\"1\"><x>1</x></det><det/><det nItem=\"2\"><x>2</x></det>";
        let found = blocks(xml, "det");
        assert_eq!(found, vec!["<x>1</x>", "<x>2</x>"]);
        assert_eq!(leaf(xml, "tPag").as_deref(), Some("17"));
    }

    #[test]
    fn decodes_entities_in_leaves() {
        assert_eq!(
            leaf("<xNome>A &amp; B</xNome>", "xNome").as_deref(),
            Some("A & B")
        );
    }
}
