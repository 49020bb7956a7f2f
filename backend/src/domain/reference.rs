//! Reference resolver.
//!
//! Turns the text decoded from an invoice QR code into a
//! [`CanonicalReference`]. Two URL shapes are accepted:
//!
//! - the pipe-encoded `p` parameter
//!   (`p=chave|versao|tpAmb[|cDest|dhEmi|vNF|vICMS|digVal|cIdToken|cHash]`);
//! - the legacy individual parameters (`chNFe`, `nVersao`, `tpAmb`, ...).
//!
//! The 44-digit access key is validated (length and modulo-11 check digit)
//! and decoded. Resolution never touches the network.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use url::Url;

use super::error::PipelineError;
use super::money::parse_amount;

const ACCESS_KEY_LEN: usize = 44;

/// Offset used when a portal prints a timestamp without a zone (Brasília).
pub const PORTAL_LOCAL_OFFSET_SECS: i32 = -3 * 3600;

const REGIONS: [(u8, &str); 27] = [
    (11, "RO"),
    (12, "AC"),
    (13, "AM"),
    (14, "RR"),
    (15, "PA"),
    (16, "AP"),
    (17, "TO"),
    (21, "MA"),
    (22, "PI"),
    (23, "CE"),
    (24, "RN"),
    (25, "PB"),
    (26, "PE"),
    (27, "AL"),
    (28, "SE"),
    (29, "BA"),
    (31, "MG"),
    (32, "ES"),
    (33, "RJ"),
    (35, "SP"),
    (41, "PR"),
    (42, "SC"),
    (43, "RS"),
    (50, "MS"),
    (51, "MT"),
    (52, "GO"),
    (53, "DF"),
];

/// Issuing region, identified by the IBGE state code (`cUF`).
///
/// Codes outside the 27 known states are representable so that the portal
/// registry can report them as unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region(u8);

impl Region {
    /// Wrap a raw `cUF` code.
    pub const fn from_code(code: u8) -> Self {
        Self(code)
    }

    /// Look up a region by its two-letter abbreviation.
    pub fn from_abbreviation(abbreviation: &str) -> Option<Self> {
        REGIONS
            .iter()
            .find(|(_, abbr)| abbr.eq_ignore_ascii_case(abbreviation.trim()))
            .map(|(code, _)| Self(*code))
    }

    /// Raw `cUF` code.
    pub const fn code(self) -> u8 {
        self.0
    }

    /// Two-letter state abbreviation, when the code is known.
    pub fn abbreviation(self) -> Option<&'static str> {
        REGIONS
            .iter()
            .find(|(code, _)| *code == self.0)
            .map(|(_, abbr)| *abbr)
    }

    /// All 27 known regions in code order.
    pub fn known() -> impl Iterator<Item = Self> {
        REGIONS.iter().map(|(code, _)| Self(*code))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.abbreviation() {
            Some(abbr) => f.write_str(abbr),
            None => write!(f, "region {}", self.0),
        }
    }
}

/// Fiscal document model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvoiceModel {
    /// NF-e, model 55.
    #[serde(rename = "nfe")]
    Nfe,
    /// NFC-e, model 65.
    #[serde(rename = "nfce")]
    Nfce,
}

impl InvoiceModel {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "55" => Some(Self::Nfe),
            "65" => Some(Self::Nfce),
            _ => None,
        }
    }
}

/// Issuing environment (`tpAmb`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// `tpAmb=1`.
    Production,
    /// `tpAmb=2`.
    Homologation,
}

impl Environment {
    /// Numeric `tpAmb` value.
    pub const fn code(self) -> u8 {
        match self {
            Self::Production => 1,
            Self::Homologation => 2,
        }
    }
}

/// Validated 44-digit access key (`chave de acesso`).
///
/// Layout: `cUF(2) AAMM(4) CNPJ(14) mod(2) serie(3) nNF(9) tpEmis(1) cNF(8)
/// cDV(1)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessKey(String);

/// Reasons an access key is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessKeyError {
    /// Wrong length or non-digit characters.
    #[error("access key must contain exactly 44 digits")]
    Malformed,
    /// Modulo-11 check digit mismatch.
    #[error("access key check digit mismatch")]
    CheckDigit,
    /// `AAMM` month outside 01..=12.
    #[error("access key emission month is invalid")]
    Month,
    /// Model other than 55 or 65.
    #[error("unsupported fiscal document model `{0}`")]
    Model(String),
}

impl AccessKey {
    /// Validate and wrap an access key. Whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`AccessKeyError`] when the key is malformed.
    ///
    /// # Examples
    ///
    /// ```
    /// use invoice_backend::domain::AccessKey;
    ///
    /// let key = AccessKey::parse("35241012345678000190650010000012341000012344");
    /// assert!(key.is_err(), "the check digit for this key is 2");
    /// ```
    pub fn parse(raw: &str) -> Result<Self, AccessKeyError> {
        let digits: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if digits.len() != ACCESS_KEY_LEN || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AccessKeyError::Malformed);
        }
        let (body, check) = digits.split_at(ACCESS_KEY_LEN - 1);
        let expected = check_digit(body).ok_or(AccessKeyError::Malformed)?;
        if check.as_bytes().first().map(|b| b - b'0') != Some(expected) {
            return Err(AccessKeyError::CheckDigit);
        }
        let month = digits.get(4..6).and_then(|m| m.parse::<u8>().ok());
        if !matches!(month, Some(1..=12)) {
            return Err(AccessKeyError::Month);
        }
        let model = digits.get(20..22).unwrap_or_default();
        if InvoiceModel::from_code(model).is_none() {
            return Err(AccessKeyError::Model(model.to_owned()));
        }
        Ok(Self(digits))
    }

    /// The 44 digits.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn field(&self, start: usize, end: usize) -> &str {
        self.0.get(start..end).unwrap_or_default()
    }

    /// Issuing region (`cUF`).
    pub fn region(&self) -> Region {
        Region(self.field(0, 2).parse().unwrap_or_default())
    }

    /// Emission year and month decoded from `AAMM`.
    pub fn year_month(&self) -> (i32, u32) {
        let year = self.field(2, 4).parse::<i32>().unwrap_or_default() + 2000;
        let month = self.field(4, 6).parse::<u32>().unwrap_or(1);
        (year, month)
    }

    /// Issuer CNPJ, 14 digits.
    pub fn issuer_cnpj(&self) -> &str {
        self.field(6, 20)
    }

    /// Document model.
    pub fn model(&self) -> InvoiceModel {
        InvoiceModel::from_code(self.field(20, 22)).unwrap_or(InvoiceModel::Nfce)
    }

    /// Series number.
    pub fn series(&self) -> u16 {
        self.field(22, 25).parse().unwrap_or_default()
    }

    /// Document number.
    pub fn number(&self) -> u32 {
        self.field(25, 34).parse().unwrap_or_default()
    }

    /// Emission type (`tpEmis`).
    pub fn emission_type(&self) -> &str {
        self.field(34, 35)
    }

    /// Numeric code (`cNF`).
    pub fn numeric_code(&self) -> &str {
        self.field(35, 43)
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccessKey {
    type Error = AccessKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccessKey> for String {
    fn from(value: AccessKey) -> Self {
        value.0
    }
}

/// Modulo-11 check digit of the first 43 key digits.
///
/// Weights cycle 2..=9 from the rightmost digit; remainders 0 and 1 map to 0.
///
/// # Examples
///
/// ```
/// use invoice_backend::domain::check_digit;
///
/// assert_eq!(check_digit("3524101234567800019065001000001234100001234"), Some(2));
/// ```
pub fn check_digit(body: &str) -> Option<u8> {
    if body.len() != ACCESS_KEY_LEN - 1 {
        return None;
    }
    let mut sum: u32 = 0;
    for (index, byte) in body.bytes().rev().enumerate() {
        if !byte.is_ascii_digit() {
            return None;
        }
        let weight = u32::try_from(index % 8).ok()? + 2;
        sum += u32::from(byte - b'0') * weight;
    }
    let remainder = sum % 11;
    let digit = if remainder < 2 { 0 } else { 11 - remainder };
    u8::try_from(digit).ok()
}

/// Which QR URL shape the reference was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceFormat {
    /// Pipe-encoded `p` parameter.
    PipeParameter,
    /// Individual query parameters.
    LegacyParameters,
}

/// Normalised invoice reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalReference {
    /// Validated access key.
    pub access_key: AccessKey,
    /// Issuing region decoded from the key.
    pub region: Region,
    /// Document model decoded from the key.
    pub model: InvoiceModel,
    /// Issuing environment.
    pub environment: Environment,
    /// QR code version (`nVersao`).
    pub version: String,
    /// Portal address printed in the QR code, without query or fragment.
    pub portal_url: Url,
    /// Canonical pipe-encoded parameter value.
    pub query: String,
    /// Shape of the submitted URL.
    pub format: ReferenceFormat,
    /// Total declared in the QR payload, when present.
    pub declared_total: Option<Decimal>,
    /// Emission timestamp declared in the QR payload, when present.
    pub declared_emission: Option<DateTime<Utc>>,
}

impl CanonicalReference {
    /// Canonical lookup URL (`portal_url?p=query`).
    pub fn canonical_url(&self) -> Url {
        let mut url = self.portal_url.clone();
        url.query_pairs_mut().clear().append_pair("p", &self.query);
        url
    }
}

#[derive(Default)]
struct RawFields {
    key: Option<String>,
    version: Option<String>,
    environment: Option<String>,
    extras: Vec<String>,
    emission: Option<String>,
    total: Option<String>,
}

/// Resolve raw reference text into a [`CanonicalReference`].
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInvoiceReference`] for any unrecognised
/// shape, a malformed access key, or an invalid environment.
///
/// # Examples
///
/// ```
/// use invoice_backend::domain::resolve_reference;
///
/// let reference = resolve_reference(
///     "https://www.nfce.fazenda.sp.gov.br/qrcode?p=35241012345678000190650010000012341000012342|2|1",
/// )?;
/// assert_eq!(reference.region.to_string(), "SP");
/// assert_eq!(reference.access_key.number(), 1234);
/// # Ok::<(), invoice_backend::domain::PipelineError>(())
/// ```
pub fn resolve_reference(raw: &str) -> Result<CanonicalReference, PipelineError> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed)
        .map_err(|_| PipelineError::invalid_reference("expected a portal URL"))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(PipelineError::invalid_reference(
            "expected an http or https portal URL",
        ));
    }

    let (fields, format) = extract_fields(&url)?;
    let raw_key = fields
        .key
        .ok_or_else(|| PipelineError::invalid_reference("access key is missing"))?;
    let access_key = AccessKey::parse(&raw_key)
        .map_err(|error| PipelineError::invalid_reference(error.to_string()))?;

    let environment = match fields.environment.as_deref() {
        None | Some("1") => Environment::Production,
        Some("2") => Environment::Homologation,
        Some(other) => {
            return Err(PipelineError::invalid_reference(format!(
                "unknown environment `{other}`"
            )));
        }
    };
    let version = fields.version.unwrap_or_else(|| "2".to_owned());

    let mut portal_url = url.clone();
    portal_url.set_query(None);
    portal_url.set_fragment(None);

    let mut parts = vec![
        access_key.as_str().to_owned(),
        version.clone(),
        environment.code().to_string(),
    ];
    parts.extend(fields.extras);
    while parts.last().is_some_and(String::is_empty) {
        parts.pop();
    }

    Ok(CanonicalReference {
        region: access_key.region(),
        model: access_key.model(),
        access_key,
        environment,
        version,
        portal_url,
        query: parts.join("|"),
        format,
        declared_total: fields.total.as_deref().and_then(parse_amount),
        declared_emission: fields.emission.as_deref().and_then(parse_declared_emission),
    })
}

fn extract_fields(url: &Url) -> Result<(RawFields, ReferenceFormat), PipelineError> {
    let param = |name: &str| {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    };

    if let Some(p) = param("p") {
        let parts: Vec<String> = p.split('|').map(|part| part.trim().to_owned()).collect();
        let at = |index: usize| parts.get(index).filter(|v| !v.is_empty()).cloned();
        // Online NFC-e codes carry only key|version|env|id|hash; the long
        // offline shape has dhEmi at index 4 and vNF at 5.
        let long_form = parts.len() > 5;
        let fields = RawFields {
            key: at(0),
            version: at(1),
            environment: at(2),
            extras: parts.iter().skip(3).cloned().collect(),
            emission: if long_form { at(4) } else { None },
            total: if long_form { at(5) } else { None },
        };
        return Ok((fields, ReferenceFormat::PipeParameter));
    }

    if let Some(key) = param("chNFe") {
        let extras = ["cDest", "dhEmi", "vNF", "vICMS", "digVal", "cIdToken"]
            .iter()
            .map(|name| param(name).unwrap_or_default())
            .collect();
        let fields = RawFields {
            key: Some(key),
            version: param("nVersao").or_else(|| param("versao")),
            environment: param("tpAmb"),
            extras,
            emission: param("dhEmi"),
            total: param("vNF"),
        };
        return Ok((fields, ReferenceFormat::LegacyParameters));
    }

    Err(PipelineError::invalid_reference(
        "URL carries neither a `p` nor a `chNFe` parameter",
    ))
}

/// Parse an emission timestamp as printed in QR payloads.
///
/// Accepts RFC 3339, hex-encoded RFC 3339 (NFC-e 1.0 QR codes),
/// `YYYYMMDDhhmmss`, and zone-less `YYYY-MM-DDThh:mm:ss` read as Brasília
/// time.
pub fn parse_declared_emission(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    if trimmed.len() > 14 && trimmed.len() % 2 == 0 {
        if let Some(decoded) = hex::decode(trimmed)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
        {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(decoded.trim()) {
                return Some(parsed.with_timezone(&Utc));
            }
        }
    }
    ["%Y%m%d%H%M%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .and_then(portal_local_to_utc)
}

/// Interpret a zone-less portal timestamp as Brasília time.
pub fn portal_local_to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    FixedOffset::east_opt(PORTAL_LOCAL_OFFSET_SECS)?
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
}
