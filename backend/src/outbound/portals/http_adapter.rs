//! Reqwest-backed portal adapter.
//!
//! This adapter owns transport details only: query construction for its
//! request style, timeout and HTTP error mapping, and body decoding. Parsing
//! happens in the domain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use super::endpoints::{PortalEndpoint, RequestStyle};
use super::headers::HeaderRotation;
use crate::domain::ports::{DocumentFormat, PortalAdapter, PortalFetchError, RawDocument};
use crate::domain::{CanonicalReference, PortalRegistryBuilder, Region};

/// Request timeout used when none is configured.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Portal adapter that performs HTTP GET requests against one endpoint.
pub struct HttpPortalAdapter {
    client: Client,
    endpoint: PortalEndpoint,
    headers: Arc<HeaderRotation>,
}

impl HttpPortalAdapter {
    /// Build an adapter with its own reqwest client and an explicit timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(endpoint: PortalEndpoint, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(
            client,
            endpoint,
            Arc::new(HeaderRotation::new()),
        ))
    }

    /// Build an adapter sharing `client` and `headers` with other regions.
    pub fn with_client(
        client: Client,
        endpoint: PortalEndpoint,
        headers: Arc<HeaderRotation>,
    ) -> Self {
        Self {
            client,
            endpoint,
            headers,
        }
    }

    fn request_url(&self, reference: &CanonicalReference) -> Url {
        let mut url = self.endpoint.base_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            match self.endpoint.style {
                RequestStyle::PipeParameter => {
                    pairs.append_pair("p", &reference.query);
                }
                RequestStyle::LegacyParameters => {
                    pairs
                        .append_pair("chNFe", reference.access_key.as_str())
                        .append_pair("nVersao", &reference.version)
                        .append_pair("tpAmb", &reference.environment.code().to_string());
                }
                RequestStyle::XmlService => {
                    pairs
                        .append_pair("chNFe", reference.access_key.as_str())
                        .append_pair("tpAmb", &reference.environment.code().to_string());
                }
            }
        }
        url
    }
}

#[async_trait]
impl PortalAdapter for HttpPortalAdapter {
    fn region(&self) -> Region {
        self.endpoint.region
    }

    async fn fetch(&self, reference: &CanonicalReference) -> Result<RawDocument, PortalFetchError> {
        let url = self.request_url(reference);
        let mut request = self.client.get(url.clone());
        for (name, value) in self.headers.next_headers().pairs() {
            request = request.header(name, value);
        }
        if self.endpoint.style == RequestStyle::XmlService {
            request = request.header(reqwest::header::ACCEPT, "application/xml, text/xml");
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, body.as_ref()));
        }

        let text = decode_body(body.as_ref());
        if text.trim().is_empty() {
            return Err(PortalFetchError::malformed(format!(
                "empty body from {}",
                self.endpoint.base_url
            )));
        }
        let format = detect_format(&text);
        if self.endpoint.style == RequestStyle::XmlService && format != DocumentFormat::Xml {
            return Err(PortalFetchError::malformed(format!(
                "expected an nfeProc document: {}",
                body_preview(body.as_ref())
            )));
        }
        debug!(region = %self.endpoint.region, bytes = body.len(), ?format, "portal responded");

        Ok(RawDocument {
            region: self.endpoint.region,
            format,
            body: text,
            source_url: url.to_string(),
        })
    }
}

/// Register one adapter per endpoint, sharing a single client.
///
/// # Errors
///
/// Returns an error when the reqwest client cannot be constructed.
pub fn register_http_portals<I>(
    builder: PortalRegistryBuilder,
    endpoints: I,
    timeout: Duration,
) -> Result<PortalRegistryBuilder, reqwest::Error>
where
    I: IntoIterator<Item = PortalEndpoint>,
{
    let client = Client::builder().timeout(timeout).build()?;
    let headers = Arc::new(HeaderRotation::new());
    Ok(endpoints.into_iter().fold(builder, |builder, endpoint| {
        builder.register(Arc::new(HttpPortalAdapter::with_client(
            client.clone(),
            endpoint,
            headers.clone(),
        )))
    }))
}

/// Decode as UTF-8, falling back to Latin-1 for legacy portals.
fn decode_body(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_owned(),
        Err(_) => body.iter().map(|byte| char::from(*byte)).collect(),
    }
}

fn detect_format(text: &str) -> DocumentFormat {
    let head = text.trim_start();
    if head.starts_with("<?xml") || head.starts_with("<nfeProc") || head.starts_with("<NFe") {
        DocumentFormat::Xml
    } else {
        DocumentFormat::Html
    }
}

fn map_transport_error(error: reqwest::Error) -> PortalFetchError {
    if error.is_timeout() {
        PortalFetchError::timeout(error.to_string())
    } else {
        PortalFetchError::transport(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &[u8]) -> PortalFetchError {
    let body_preview = body_preview(body);
    let message = if body_preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), body_preview)
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => PortalFetchError::rate_limited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            PortalFetchError::timeout(message)
        }
        _ if status.is_client_error() => PortalFetchError::rejected(message),
        _ => PortalFetchError::transport(message),
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}
