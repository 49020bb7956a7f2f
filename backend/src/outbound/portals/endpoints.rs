//! Static portal endpoint table.

use url::Url;

use crate::domain::Region;

/// How a portal expects the access key to be passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStyle {
    /// `GET base?p=chave|versao|tpAmb[|...]`, answered with HTML.
    PipeParameter,
    /// `GET base?chNFe=...&nVersao=...&tpAmb=...`, answered with HTML.
    LegacyParameters,
    /// `GET base?chNFe=...&tpAmb=...`, answered with an `nfeProc` document.
    XmlService,
}

/// Where and how to query one region's portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalEndpoint {
    /// Region served.
    pub region: Region,
    /// Query construction.
    pub style: RequestStyle,
    /// Base URL, without query.
    pub base_url: Url,
}

impl PortalEndpoint {
    /// Build an endpoint.
    pub fn new(region: Region, style: RequestStyle, base_url: Url) -> Self {
        Self {
            region,
            style,
            base_url,
        }
    }
}

const DEFAULT_TABLE: [(u8, RequestStyle, &str); 27] = [
    (11, RequestStyle::LegacyParameters, "http://www.nfce.sefin.ro.gov.br/consultanfce/consulta.jsp"),
    (12, RequestStyle::PipeParameter, "http://www.sefaznet.ac.gov.br/nfce/qrcode"),
    (13, RequestStyle::LegacyParameters, "https://sistemas.sefaz.am.gov.br/nfceweb/consultarNFCe.jsp"),
    (14, RequestStyle::PipeParameter, "https://www.sefaz.rr.gov.br/nfce/servlet/qrcode"),
    (15, RequestStyle::PipeParameter, "https://appnfc.sefa.pa.gov.br/portal/view/consultas/nfce/nfceForm.seam"),
    (16, RequestStyle::PipeParameter, "https://www.sefaz.ap.gov.br/nfce/nfcep.php"),
    (17, RequestStyle::PipeParameter, "http://www.sefaz.to.gov.br/nfce/qrcode"),
    (21, RequestStyle::LegacyParameters, "http://nfce.sefaz.ma.gov.br/portal/consultarNFCe.jsp"),
    (22, RequestStyle::PipeParameter, "http://www.sefaz.pi.gov.br/nfce/qrcode"),
    (23, RequestStyle::PipeParameter, "http://nfce.sefaz.ce.gov.br/pages/ShowNFCe.html"),
    (24, RequestStyle::PipeParameter, "http://nfce.set.rn.gov.br/consultarNFCe.aspx"),
    (25, RequestStyle::PipeParameter, "http://www.sefaz.pb.gov.br/nfce"),
    (26, RequestStyle::PipeParameter, "http://nfce.sefaz.pe.gov.br/nfce/consulta"),
    (27, RequestStyle::PipeParameter, "http://nfce.sefaz.al.gov.br/QRCode/consultarNFCe.jsp"),
    (28, RequestStyle::PipeParameter, "http://www.nfce.se.gov.br/nfce/qrcode"),
    (29, RequestStyle::PipeParameter, "http://nfe.sefaz.ba.gov.br/servicos/nfce/qrcode.aspx"),
    (31, RequestStyle::PipeParameter, "https://portalsped.fazenda.mg.gov.br/portalnfce/sistema/qrcode.xhtml"),
    (32, RequestStyle::PipeParameter, "http://app.sefaz.es.gov.br/ConsultaNFCe/qrcode.aspx"),
    (33, RequestStyle::PipeParameter, "https://consultadfe.fazenda.rj.gov.br/consultaNFCe/QRCode"),
    (35, RequestStyle::PipeParameter, "https://www.nfce.fazenda.sp.gov.br/qrcode"),
    (41, RequestStyle::PipeParameter, "http://www.fazenda.pr.gov.br/nfce/qrcode"),
    (42, RequestStyle::PipeParameter, "https://sat.sef.sc.gov.br/nfce/consulta"),
    (43, RequestStyle::PipeParameter, "https://www.sefaz.rs.gov.br/NFCE/NFCE-COM.aspx"),
    (50, RequestStyle::PipeParameter, "http://www.dfe.ms.gov.br/nfce/qrcode"),
    (51, RequestStyle::PipeParameter, "http://www.sefaz.mt.gov.br/nfce/consultanfce"),
    (52, RequestStyle::PipeParameter, "http://nfe.sefaz.go.gov.br/nfeweb/sites/nfce/danfeNFCe"),
    (53, RequestStyle::PipeParameter, "http://www.fazenda.df.gov.br/nfce/qrcode"),
];

/// Public consultation endpoints for the 27 known regions.
///
/// Rows whose URL fails to parse are skipped with a warning, leaving that
/// region unsupported.
pub fn default_endpoints() -> Vec<PortalEndpoint> {
    DEFAULT_TABLE
        .iter()
        .filter_map(|(code, style, raw)| match Url::parse(raw) {
            Ok(base_url) => Some(PortalEndpoint::new(Region::from_code(*code), *style, base_url)),
            Err(error) => {
                tracing::warn!(code, %error, "skipping unparsable portal endpoint");
                None
            }
        })
        .collect()
}
