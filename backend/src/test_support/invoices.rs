//! Sample access keys, portal documents and stored records.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    AccessKey, CanonicalReference, Fingerprint, Invoice, InvoiceHeader, InvoiceModel, Issuer,
    LineItem, Region, StoredRecord, UserId, check_digit, resolve_reference,
};

const SAMPLE_CNPJ: &str = "12345678000190";
const SAMPLE_PORTAL: &str = "https://www.nfce.fazenda.sp.gov.br/qrcode";

/// Build a valid 44-digit access key, computing the check digit.
///
/// # Panics
///
/// Panics when the assembled body is not 43 digits long.
pub fn access_key(region: u8, yymm: &str, cnpj: &str, model: u8, series: u16, number: u32) -> String {
    let body = format!("{region:02}{yymm}{cnpj}{model:02}{series:03}{number:09}1{number:08}");
    match check_digit(&body) {
        Some(digit) => format!("{body}{digit}"),
        None => panic!("access key body must be 43 digits: {body}"),
    }
}

/// Access key of the sample SP invoice number 1234.
pub fn sample_key() -> String {
    access_key(35, "2410", SAMPLE_CNPJ, 65, 1, 1234)
}

/// QR URL of the sample SP invoice.
pub fn sample_url() -> String {
    format!("{SAMPLE_PORTAL}?p={}|2|1", sample_key())
}

/// Resolved reference for invoice 1234 issued in `region_code`.
///
/// # Panics
///
/// Panics when the generated URL does not resolve.
pub fn sample_reference(region_code: u8) -> CanonicalReference {
    let key = access_key(region_code, "2410", SAMPLE_CNPJ, 65, 1, 1234);
    match resolve_reference(&format!("{SAMPLE_PORTAL}?p={key}|2|1")) {
        Ok(reference) => reference,
        Err(error) => panic!("sample reference must resolve: {error}"),
    }
}

/// Stored SP invoice with a single line item worth `total`.
///
/// # Panics
///
/// Panics when the generated access key is rejected.
pub fn sample_record(
    number: u32,
    emitted_at: DateTime<Utc>,
    total: Decimal,
    submitted_by: UserId,
) -> StoredRecord {
    let access_key = match AccessKey::parse(&access_key(35, "2410", SAMPLE_CNPJ, 65, 1, number)) {
        Ok(key) => key,
        Err(error) => panic!("sample access key: {error}"),
    };
    let fingerprint = Fingerprint::derive(SAMPLE_CNPJ, number, 1, emitted_at);
    let header = InvoiceHeader {
        region: Region::from_code(35),
        access_key,
        model: InvoiceModel::Nfce,
        issuer: Issuer {
            id: SAMPLE_CNPJ.to_owned(),
            name: Some("MERCADO EXEMPLO LTDA".to_owned()),
            address: None,
        },
        number,
        series: 1,
        emitted_at,
        total,
        discount: None,
        amount_paid: None,
        taxes: None,
        payments: Vec::new(),
        protocol: None,
        consumer: None,
        source_url: format!("{SAMPLE_PORTAL}?p=sample"),
    };
    let line_items = vec![LineItem {
        fingerprint: fingerprint.clone(),
        description: format!("ITEM {number}"),
        code: Some(number.to_string()),
        quantity: Decimal::ONE,
        unit: Some("UN".to_owned()),
        unit_price: total,
        total,
        category: Some("NCM 22".to_owned()),
    }];
    StoredRecord {
        invoice: Invoice {
            fingerprint,
            header,
            submitted_by,
            stored_at: emitted_at,
        },
        line_items,
    }
}

/// Product row of a [`SampleDocument`].
#[derive(Debug, Clone)]
pub struct SampleItem {
    pub description: String,
    pub code: String,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    pub total: Decimal,
    pub ncm: String,
}

/// Invoice rendered either as a consultation page or as `nfeProc` XML.
///
/// Both renderings describe the same invoice, so they parse to the same
/// fingerprint.
#[derive(Debug, Clone)]
pub struct SampleDocument {
    pub issuer_name: String,
    /// Punctuated CNPJ as printed on consultation pages.
    pub cnpj: String,
    pub number: u32,
    pub series: u16,
    pub total: Option<Decimal>,
    pub discount: Decimal,
    pub taxes: Decimal,
    pub items: Vec<SampleItem>,
}

impl Default for SampleDocument {
    fn default() -> Self {
        Self {
            issuer_name: "MERCADO EXEMPLO LTDA".to_owned(),
            cnpj: "12.345.678/0001-90".to_owned(),
            number: 1234,
            series: 1,
            total: Some(Decimal::new(2990, 2)),
            discount: Decimal::new(0, 2),
            taxes: Decimal::new(543, 2),
            items: vec![
                SampleItem {
                    description: "REFRIGERANTE COLA 2L".to_owned(),
                    code: "7894900011517".to_owned(),
                    quantity: Decimal::new(2, 0),
                    unit: "UN".to_owned(),
                    unit_price: Decimal::new(999, 2),
                    total: Decimal::new(1998, 2),
                    ncm: "22021000".to_owned(),
                },
                SampleItem {
                    description: "PAO FRANCES KG".to_owned(),
                    code: "123".to_owned(),
                    quantity: Decimal::new(5, 1),
                    unit: "KG".to_owned(),
                    unit_price: Decimal::new(1984, 2),
                    total: Decimal::new(992, 2),
                    ncm: "19052090".to_owned(),
                },
            ],
        }
    }
}

fn brl(value: Decimal) -> String {
    value.to_string().replace('.', ",")
}

impl SampleDocument {
    /// Emission timestamp shared by both renderings (10:15 Brasília).
    pub fn emitted_at() -> DateTime<Utc> {
        match Utc.with_ymd_and_hms(2024, 10, 5, 13, 15, 0).single() {
            Some(at) => at,
            None => panic!("valid sample emission"),
        }
    }

    fn cnpj_digits(&self) -> String {
        self.cnpj.chars().filter(char::is_ascii_digit).collect()
    }

    fn paid(&self) -> Decimal {
        self.total.unwrap_or_default() - self.discount
    }

    /// Public consultation page.
    pub fn html(&self) -> String {
        let rows: String = self
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                format!(
                    concat!(
                        "<tr id=\"Item + {}\"><td valign=\"top\">",
                        "<span class=\"txtTit\">{}</span>",
                        "<span class=\"RCod\">(Código: {} )</span>",
                        "<span class=\"Rqtd\"><strong>Qtde.:</strong>{}</span>",
                        "<span class=\"RUN\"><strong>UN: </strong>{}</span>",
                        "<span class=\"RvlUnit\"><strong>Vl. Unit.:</strong>&nbsp;{}</span>",
                        "</td><td align=\"right\" valign=\"top\" class=\"txtTit noWrap\">",
                        "Vl. Total<br><span class=\"valor\">{}</span></td></tr>\n"
                    ),
                    index + 1,
                    item.description,
                    item.code,
                    brl(item.quantity),
                    item.unit,
                    brl(item.unit_price),
                    brl(item.total),
                )
            })
            .collect();
        let total_line = self.total.map_or_else(String::new, |total| {
            format!(
                "<div id=\"linhaTotal\"><label>Valor total R$:</label><span class=\"totalNumb\">{}</span></div>\n",
                brl(total)
            )
        });
        format!(
            r#"<!DOCTYPE html>
<html><head><title>Consulta Pública NFC-e</title>
<script type="text/javascript">var chave = '<div>';</script>
<style>.txtTit {{ font-weight: bold; }}</style>
</head><body>
<div id="conteudo">
<div class="txtCenter">
<div id="u20" class="txtTopo">{issuer}</div>
<div class="text">CNPJ: {cnpj}</div>
<div class="text">RUA DAS FLORES, 100, CENTRO, SAO PAULO, SP</div>
</div>
<table id="tabResult" cellspacing="0" cellpadding="0" border="0" align="center">
{rows}</table>
<div id="totalNota" class="txtRight">
<div id="linhaTotal"><label>Qtd. total de itens:</label><span class="totalNumb">{count}</span></div>
{total_line}<div id="linhaTotal"><label>Descontos R$:</label><span class="totalNumb">{discount}</span></div>
<div id="linhaTotal" class="linhaShade"><label>Valor a pagar R$:</label><span class="totalNumb txtMax">{paid}</span></div>
<div id="linhaForma"><label>Forma de pagamento:</label><span class="totalNumb txtTitR">Valor pago R$:</span></div>
<div id="linhaTotal"><label class="tx">Cartão de Débito</label><span class="totalNumb">{paid}</span></div>
<div id="linhaTotal"><label class="txtObs">Tributos Totais Incidentes (Lei Federal 12.741/2012) R$</label><span class="totalNumb txtObs">{taxes}</span></div>
</div>
<div data-role="collapsible"><h4>Informações gerais da Nota</h4>
<ul><li><strong>Emissão normal</strong></li>
<li><strong>Número: </strong>{number}<strong> Série: </strong>{series}<strong> Emissão: </strong>05/10/2024 10:15:00 - Via Consumidor</li>
<li><strong>Protocolo de Autorização: </strong>135240000000001 05/10/2024 às 10:15:05</li></ul>
<h4>Chave de acesso</h4><span class="chave">3524 1012 3456 7800 0190 6500 1000 0012 3410 0001 2342</span>
<h4>Consumidor</h4><ul><li>CONSUMIDOR NÃO IDENTIFICADO</li></ul>
</div>
</div></body></html>"#,
            issuer = self.issuer_name,
            cnpj = self.cnpj,
            rows = rows,
            count = self.items.len(),
            total_line = total_line,
            discount = brl(self.discount),
            paid = brl(self.paid()),
            taxes = brl(self.taxes),
            number = self.number,
            series = self.series,
        )
    }

    /// Authorised `nfeProc` document.
    pub fn xml(&self) -> String {
        let details: String = self
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                format!(
                    concat!(
                        "<det nItem=\"{}\"><prod><cProd>{}</cProd><cEAN>SEM GTIN</cEAN>",
                        "<xProd>{}</xProd><NCM>{}</NCM><CFOP>5102</CFOP><uCom>{}</uCom>",
                        "<qCom>{}</qCom><vUnCom>{}</vUnCom><vProd>{}</vProd></prod>",
                        "<imposto><vTotTrib>0.00</vTotTrib></imposto></det>"
                    ),
                    index + 1,
                    item.code,
                    item.description,
                    item.ncm,
                    item.unit,
                    item.quantity,
                    item.unit_price,
                    item.total,
                )
            })
            .collect();
        let total = self
            .total
            .map_or_else(String::new, |total| format!("<vNF>{total}</vNF>"));
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<nfeProc xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00"><NFe><infNFe Id="NFe{key}" versao="4.00">
<ide><cUF>35</cUF><cNF>00001234</cNF><natOp>VENDA</natOp><mod>65</mod><serie>{series}</serie><nNF>{number}</nNF><dhEmi>2024-10-05T10:15:00-03:00</dhEmi><tpNF>1</tpNF><idDest>1</idDest></ide>
<emit><CNPJ>{cnpj}</CNPJ><xNome>{issuer}</xNome><xFant>MERCADO EXEMPLO</xFant><enderEmit><xLgr>RUA DAS FLORES</xLgr><nro>100</nro><xBairro>CENTRO</xBairro><cMun>3550308</cMun><xMun>SAO PAULO</xMun><UF>SP</UF></enderEmit></emit>
{details}
<total><ICMSTot><vBC>0.00</vBC><vProd>{total_products}</vProd><vDesc>{discount}</vDesc>{total}<vTotTrib>{taxes}</vTotTrib></ICMSTot></total>
<pag><detPag><tPag>04</tPag><vPag>{paid}</vPag></detPag></pag>
</infNFe></NFe>
<protNFe versao="4.00"><infProt><tpAmb>1</tpAmb><chNFe>{key}</chNFe><dhRecbto>2024-10-05T10:15:05-03:00</dhRecbto><nProt>135240000000001</nProt><cStat>100</cStat></infProt></protNFe>
</nfeProc>"#,
            key = sample_key(),
            series = self.series,
            number = self.number,
            cnpj = self.cnpj_digits(),
            issuer = self.issuer_name,
            details = details,
            total_products = self.items.iter().map(|item| item.total).sum::<Decimal>(),
            discount = self.discount,
            total = total,
            taxes = self.taxes,
            paid = self.paid(),
        )
    }
}
