//! Extraction from public consultation HTML pages.
//!
//! The page is flattened into trimmed text lines (scripts and styles removed,
//! entities decoded, block elements split) and, separately, into table rows.
//! Product rows follow the shape
//! `DESCRIPTION (Código: N) Qtde.: q UN: u Vl. Unit.: p | Vl. Total t`.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use super::{ExtractedFields, ExtractedItem, cached};
use crate::domain::invoice::{Payment, PaymentMethod};
use crate::domain::money::parse_amount;
use crate::domain::reference::portal_local_to_utc;

static SCRIPT_RE: OnceLock<Regex> = OnceLock::new();
static COMMENT_RE: OnceLock<Regex> = OnceLock::new();
static BLOCK_RE: OnceLock<Regex> = OnceLock::new();
static TAG_RE: OnceLock<Regex> = OnceLock::new();
static ENTITY_RE: OnceLock<Regex> = OnceLock::new();
static ROW_RE: OnceLock<Regex> = OnceLock::new();
static CELL_RE: OnceLock<Regex> = OnceLock::new();
static CNPJ_RE: OnceLock<Regex> = OnceLock::new();
static PRODUCT_RE: OnceLock<Regex> = OnceLock::new();
static QUANTITY_RE: OnceLock<Regex> = OnceLock::new();
static LINE_TOTAL_RE: OnceLock<Regex> = OnceLock::new();
static TOTAL_RE: OnceLock<Regex> = OnceLock::new();
static DISCOUNT_RE: OnceLock<Regex> = OnceLock::new();
static TO_PAY_RE: OnceLock<Regex> = OnceLock::new();
static TAXES_RE: OnceLock<Regex> = OnceLock::new();
static IDENTIFICATION_RE: OnceLock<Regex> = OnceLock::new();
static PROTOCOL_RE: OnceLock<Regex> = OnceLock::new();
static CONSUMER_RE: OnceLock<Regex> = OnceLock::new();
static PAYMENT_START_RE: OnceLock<Regex> = OnceLock::new();
static PAYMENT_END_RE: OnceLock<Regex> = OnceLock::new();
static PAYMENT_RE: OnceLock<Regex> = OnceLock::new();
static NOT_A_NAME_RE: OnceLock<Regex> = OnceLock::new();
static NOT_AN_ADDRESS_RE: OnceLock<Regex> = OnceLock::new();

const MONEY: &str = r"([\d.,]+)";

/// Extract fields from an HTML page.
pub fn extract(body: &str) -> ExtractedFields {
    let text = flatten(body);
    let mut fields = ExtractedFields::default();

    extract_issuer(&text, &mut fields);

    let rows = table_rows(body);
    fields.items = rows.iter().filter_map(|row| product(row, true)).collect();
    if fields.items.is_empty() {
        fields.items = text.lines().filter_map(|line| product(line, false)).collect();
    }

    fields.total = capture_amount(
        cached(&TOTAL_RE, &format!(r"(?i)Valor\s+total\s+R\$\s*:?\s*{MONEY}")),
        &text,
    );
    fields.discount = capture_amount(
        cached(&DISCOUNT_RE, &format!(r"(?i)Descontos?\s+R\$\s*:?\s*{MONEY}")),
        &text,
    );
    fields.amount_paid = capture_amount(
        cached(&TO_PAY_RE, &format!(r"(?i)Valor\s+a\s+pagar\s+R\$\s*:?\s*{MONEY}")),
        &text,
    );
    fields.taxes = capture_amount(
        cached(
            &TAXES_RE,
            &format!(r"(?i)Tributos\s+Totais[^\n]*?R\$\s*:?\s*{MONEY}"),
        ),
        &text,
    );

    let identification = cached(
        &IDENTIFICATION_RE,
        r"(?i)N[uú]mero:\s*(\d+)\s+S[eé]rie:\s*(\d+)\s+Emiss[aã]o:\s*(\d{2}/\d{2}/\d{4}\s+\d{2}:\d{2}(?::\d{2})?)",
    );
    if let Some(captures) = identification.captures(&text) {
        fields.number = captures.get(1).and_then(|m| m.as_str().parse().ok());
        fields.series = captures.get(2).and_then(|m| m.as_str().parse().ok());
        fields.emitted_at = captures.get(3).and_then(|m| page_timestamp(m.as_str()));
    }

    fields.protocol = cached(
        &PROTOCOL_RE,
        r"(?i)Protocolo\s+de\s+Autoriza[cç][aã]o:\s*(\d+)",
    )
    .captures(&text)
    .and_then(|captures| captures.get(1))
    .map(|m| m.as_str().to_owned());

    fields.consumer = cached(&CONSUMER_RE, r"(?im)^Consumidor\s*:?\s*\n([^\n]+)")
        .captures(&text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_owned())
        .filter(|line| !line.is_empty() && line != "CPF:" && line != "CNPJ:");

    fields.payments = payments(&text);
    fields
}

/// Flatten markup into trimmed, non-empty text lines.
pub fn flatten(body: &str) -> String {
    let without_scripts = cached(
        &SCRIPT_RE,
        r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>",
    )
    .replace_all(body, " ");
    let without_comments = cached(&COMMENT_RE, r"(?s)<!--.*?-->").replace_all(&without_scripts, " ");
    let split = cached(
        &BLOCK_RE,
        r"(?i)</?(?:div|p|br|tr|li|ul|ol|table|tbody|thead|tfoot|h[1-6]|section|header|footer|fieldset|legend)\b[^>]*>",
    )
    .replace_all(&without_comments, "\n");
    let untagged = strip_tags(&split);
    decode_entities(&untagged)
        .lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_tags(markup: &str) -> String {
    cached(&TAG_RE, r"<[^>]*>")
        .replace_all(markup, " ")
        .into_owned()
}

fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode the named and numeric entities portals emit.
pub fn decode_entities(text: &str) -> String {
    cached(&ENTITY_RE, r"&(#[xX][0-9a-fA-F]+|#\d+|[a-zA-Z]+);")
        .replace_all(text, |captures: &regex::Captures<'_>| {
            let entity = captures.get(1).map_or("", |m| m.as_str());
            decode_entity(entity).map_or_else(
                || captures.get(0).map_or(String::new(), |m| m.as_str().to_owned()),
                String::from,
            )
        })
        .into_owned()
}

fn decode_entity(entity: &str) -> Option<char> {
    if let Some(hex) = entity
        .strip_prefix("#x")
        .or_else(|| entity.strip_prefix("#X"))
    {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(decimal) = entity.strip_prefix('#') {
        return decimal.parse().ok().and_then(char::from_u32);
    }
    let decoded = match entity {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "aacute" => 'á',
        "Aacute" => 'Á',
        "acirc" => 'â',
        "Acirc" => 'Â',
        "atilde" => 'ã',
        "Atilde" => 'Ã',
        "agrave" => 'à',
        "eacute" => 'é',
        "Eacute" => 'É',
        "ecirc" => 'ê',
        "Ecirc" => 'Ê',
        "iacute" => 'í',
        "Iacute" => 'Í',
        "oacute" => 'ó',
        "Oacute" => 'Ó',
        "ocirc" => 'ô',
        "Ocirc" => 'Ô',
        "otilde" => 'õ',
        "Otilde" => 'Õ',
        "uacute" => 'ú',
        "Uacute" => 'Ú',
        "ccedil" => 'ç',
        "Ccedil" => 'Ç',
        "ordm" => 'º',
        "ordf" => 'ª',
        _ => return None,
    };
    Some(decoded)
}

fn table_rows(body: &str) -> Vec<String> {
    let cell_re = cached(&CELL_RE, r"(?is)<t[dh]\b[^>]*>(.*?)</t[dh]\s*>");
    cached(&ROW_RE, r"(?is)<tr\b[^>]*>(.*?)</tr\s*>")
        .captures_iter(body)
        .filter_map(|row| row.get(1))
        .map(|row| {
            cell_re
                .captures_iter(row.as_str())
                .filter_map(|cell| cell.get(1))
                .map(|cell| collapse_whitespace(&decode_entities(&strip_tags(cell.as_str()))))
                .filter(|cell| !cell.is_empty())
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .filter(|row| !row.is_empty())
        .collect()
}

fn product(row: &str, with_total: bool) -> Option<ExtractedItem> {
    let captures = cached(&PRODUCT_RE, r"(?i)(.+?)\s*\(C[oó]digo:\s*(\w+)\s*\)").captures(row)?;
    let description = captures
        .get(1)?
        .as_str()
        .trim_matches(|c: char| c == '|' || c.is_whitespace())
        .to_owned();
    let code = captures.get(2).map(|m| m.as_str().to_owned());

    let quantity = cached(
        &QUANTITY_RE,
        r"(?i)Qtde\.?\s*:?\s*([\d.,]+)\s+UN\s*:?\s*(\S+)\s+Vl\.?\s*Unit\.?\s*:?\s*([\d.,]+)",
    )
    .captures(row);
    let total = if with_total {
        capture_amount(
            cached(&LINE_TOTAL_RE, &format!(r"(?i)Vl\.?\s*Total\s*:?\s*{MONEY}")),
            row,
        )
        .or_else(|| row.rsplit(" | ").next().and_then(parse_amount))
    } else {
        None
    };

    Some(ExtractedItem {
        description,
        code,
        quantity: quantity
            .as_ref()
            .and_then(|c| c.get(1))
            .and_then(|m| parse_amount(m.as_str())),
        unit: quantity
            .as_ref()
            .and_then(|c| c.get(2))
            .map(|m| m.as_str().to_owned()),
        unit_price: quantity
            .as_ref()
            .and_then(|c| c.get(3))
            .and_then(|m| parse_amount(m.as_str())),
        total,
        category: None,
    })
}

fn extract_issuer(text: &str, fields: &mut ExtractedFields) {
    let cnpj_re = cached(
        &CNPJ_RE,
        r"(?i)CNPJ\s*:?\s*(\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2})",
    );
    let not_a_name = cached(&NOT_A_NAME_RE, r"(?i)Consulta|Secretar|Fazenda|SEFAZ|p[uú]blica");
    let not_an_address = cached(
        &NOT_AN_ADDRESS_RE,
        r"(?i)N[uú]mero|S[eé]rie|C[oó]digo|Emiss[aã]o",
    );
    let lines: Vec<&str> = text.lines().collect();

    for (index, line) in lines.iter().enumerate() {
        let Some(captures) = cnpj_re.captures(line) else {
            continue;
        };
        let (Some(whole), Some(cnpj)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        fields.issuer_id = Some(cnpj.as_str().chars().filter(char::is_ascii_digit).collect());

        let prefix = line[..whole.start()].trim();
        let name = if prefix.chars().count() >= 3 {
            Some(prefix)
        } else {
            index
                .checked_sub(1)
                .and_then(|previous| lines.get(previous))
                .copied()
        };
        fields.issuer_name = name
            .filter(|candidate| !not_a_name.is_match(candidate))
            .map(str::to_owned);

        let suffix = line[whole.end()..].trim();
        let address = if suffix.is_empty() {
            lines.get(index + 1).copied()
        } else {
            Some(suffix)
        };
        fields.issuer_address = address
            .filter(|candidate| !not_an_address.is_match(candidate))
            .map(clean_address)
            .filter(|candidate| !candidate.is_empty());
        return;
    }
}

fn clean_address(raw: &str) -> String {
    collapse_whitespace(raw)
        .replace(" ,", ",")
        .trim_matches(|c: char| c == ',' || c.is_whitespace())
        .to_owned()
}

fn payments(text: &str) -> Vec<Payment> {
    let Some(start) = cached(&PAYMENT_START_RE, r"(?i)Forma\s+de\s+pagamento").find(text) else {
        return Vec::new();
    };
    let rest = &text[start.end()..];
    let end = cached(
        &PAYMENT_END_RE,
        r"(?i)Informa[cç](?:[aã]o|[oõ]es)|Chave\s+de\s+acesso|Consumidor",
    )
    .find(rest)
    .map_or(rest.len(), |m| m.start());
    let section = &rest[..end];

    cached(
        &PAYMENT_RE,
        r"(?i)(Cart[aã]o\s+de\s+(?:D[eé]bito|Cr[eé]dito)|Dinheiro|Pix|Vale\s+\w+)[^\d]*([\d.,]+)",
    )
    .captures_iter(section)
    .filter_map(|captures| {
        let label = captures.get(1)?.as_str();
        Some(Payment {
            method: PaymentMethod::classify(label),
            amount: captures.get(2).and_then(|m| parse_amount(m.as_str())),
        })
    })
    .collect()
}

fn capture_amount(pattern: &Regex, text: &str) -> Option<rust_decimal::Decimal> {
    pattern
        .captures(text)
        .and_then(|captures| captures.get(1))
        .and_then(|m| parse_amount(m.as_str()))
}

fn page_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let normalised = collapse_whitespace(raw);
    ["%d/%m/%Y %H:%M:%S", "%d/%m/%Y %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&normalised, format).ok())
        .and_then(portal_local_to_utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SampleDocument;
    use chrono::TimeZone;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[test]
    fn flattening_drops_scripts_and_splits_blocks() {
        let text = flatten(
            "<html><script>var x = '<div>';</script><div>Caf&eacute;&nbsp;Bar</div><p>Linha   dois</p></html>",
        );
        assert_eq!(text, "Café Bar\nLinha dois");
    }

    #[rstest]
    #[case("&amp;", "&")]
    #[case("&#231;", "ç")]
    #[case("&#xE3;", "ã")]
    #[case("&unknown;", "&unknown;")]
    fn decodes_entities(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(decode_entities(raw), expected);
    }

    #[test]
    fn extracts_sample_page() {
        let fields = extract(&SampleDocument::default().html());
        assert_eq!(fields.issuer_id.as_deref(), Some("12345678000190"));
        assert_eq!(fields.issuer_name.as_deref(), Some("MERCADO EXEMPLO LTDA"));
        assert_eq!(
            fields.issuer_address.as_deref(),
            Some("RUA DAS FLORES, 100, CENTRO, SAO PAULO, SP")
        );
        assert_eq!(fields.number, Some(1234));
        assert_eq!(fields.series, Some(1));
        assert_eq!(
            fields.emitted_at,
            Utc.with_ymd_and_hms(2024, 10, 5, 13, 15, 0).single()
        );
        assert_eq!(fields.total, Some(dec!(29.90)));
        assert_eq!(fields.discount, Some(dec!(0.00)));
        assert_eq!(fields.amount_paid, Some(dec!(29.90)));
        assert_eq!(fields.taxes, Some(dec!(5.43)));
        assert_eq!(fields.protocol.as_deref(), Some("135240000000001"));
        assert_eq!(fields.consumer.as_deref(), Some("CONSUMIDOR NÃO IDENTIFICADO"));
        assert_eq!(
            fields.payments,
            vec![Payment {
                method: PaymentMethod::DebitCard,
                amount: Some(dec!(29.90)),
            }]
        );
    }

    #[test]
    fn extracts_product_rows() {
        let fields = extract(&SampleDocument::default().html());
        assert_eq!(fields.items.len(), 2);
        let first = &fields.items[0];
        assert_eq!(first.description, "REFRIGERANTE COLA 2L");
        assert_eq!(first.code.as_deref(), Some("7894900011517"));
        assert_eq!(first.quantity, Some(dec!(2)));
        assert_eq!(first.unit.as_deref(), Some("UN"));
        assert_eq!(first.unit_price, Some(dec!(9.99)));
        assert_eq!(first.total, Some(dec!(19.98)));
    }

    #[test]
    fn falls_back_to_text_lines_without_tables() {
        let fields = extract(
            "<div>ARROZ 5KG (Código: 42) Qtde.: 1 UN: PC Vl. Unit.: 25,90</div>",
        );
        assert_eq!(fields.items.len(), 1);
        assert_eq!(fields.items[0].total, None);
        assert_eq!(fields.items[0].unit_price, Some(dec!(25.90)));
    }
}
