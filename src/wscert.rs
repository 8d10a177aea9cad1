//! WSCert issuance client: requests a device certificate with a WSAA ticket.

use std::sync::Arc;

use quick_xml::escape::escape;
use tracing::debug;

use crate::error::{IssuanceError, XmlError};
use crate::request::CertificateRequest;
use crate::soap::{self, SoapTransport};
use crate::ticket::SecurityTicket;

pub const WSCERT_NAMESPACE: &str = "http://ar.gov.afip.dif.wscert/";

/// Index of the intermediate certificate inside `cadenaCertificacion`.
/// Element 0 is not interpreted.
pub const INTERMEDIATE_INDEX: usize = 1;

/// Certificate fields returned by WSCert, still base64 as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// The `cadenaCertificacion` array as returned.
    pub chain: Vec<String>,
    /// The device certificate.
    pub certificate: String,
}

impl IssuedCertificate {
    pub fn intermediate(&self) -> Option<&str> {
        self.chain
            .get(INTERMEDIATE_INDEX)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Everything the chain assembler needs, in canonical order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificateMaterial {
    /// Content of the root trust file.
    pub root: Option<String>,
    pub intermediate: Option<String>,
    pub leaf: String,
}

impl IssuedCertificateMaterial {
    pub fn new(root: Option<String>, issued: IssuedCertificate) -> Self {
        let intermediate = issued.intermediate().map(str::to_string);
        Self {
            root,
            intermediate,
            leaf: issued.certificate,
        }
    }
}

/// Client for the certificate issuance operation.
pub struct IssuanceClient {
    transport: Arc<dyn SoapTransport>,
    endpoint: String,
}

impl IssuanceClient {
    pub fn new(transport: Arc<dyn SoapTransport>, endpoint: impl Into<String>) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Requests one certificate. Never retries.
    pub async fn issue(
        &self,
        ticket: &SecurityTicket,
        request: &CertificateRequest,
        tax_id: &str,
        manufacturer: &str,
    ) -> Result<IssuedCertificate, IssuanceError> {
        let envelope = soap::envelope("ser", WSCERT_NAMESPACE, &request_body(ticket, request, tax_id, manufacturer));

        debug!(
            endpoint = %self.endpoint,
            model = %request.model_code,
            serial = %request.padded_serial(),
            token = %ticket.token,
            "requesting certificate"
        );
        let response = self
            .transport
            .post(&self.endpoint, "", envelope)
            .await
            .map_err(|e| IssuanceError::Network(e.0))?;

        if let Some(fault) = response.fault().map_err(invalid)? {
            return Err(IssuanceError::Rejected(format!("{}: {}", fault.code, fault.message)));
        }
        if !response.is_success() {
            let message = format!("HTTP status {}", response.status);
            return Err(if response.is_retryable_status() {
                IssuanceError::Network(message)
            } else {
                IssuanceError::InvalidResponse(message)
            });
        }

        parse_response(&response.body)
    }
}

fn request_body(
    ticket: &SecurityTicket,
    request: &CertificateRequest,
    tax_id: &str,
    manufacturer: &str,
) -> String {
    format!(
        "<ser:solicitarCertificado>\
         <authRequest>\
         <token>{token}</token>\
         <sign>{sign}</sign>\
         <cuitRepresentada>{tax_id}</cuitRepresentada>\
         </authRequest>\
         <cuitFabricante>{manufacturer}</cuitFabricante>\
         <codigoFabricante>{manufacturer_code}</codigoFabricante>\
         <codigoModelo>{model_code}</codigoModelo>\
         <numeroSerie>{serial}</numeroSerie>\
         </ser:solicitarCertificado>",
        token = escape(ticket.token.expose()),
        sign = escape(ticket.sign.expose()),
        tax_id = escape(tax_id),
        manufacturer = escape(manufacturer),
        manufacturer_code = escape(request.manufacturer_code.as_str()),
        model_code = escape(request.model_code.as_str()),
        serial = request.padded_serial(),
    )
}

fn parse_response(body: &str) -> Result<IssuedCertificate, IssuanceError> {
    let codes = soap::element_texts(body, "codigo").map_err(invalid)?;
    let descriptions = soap::element_texts(body, "descripcion").map_err(invalid)?;
    if !codes.is_empty() || !descriptions.is_empty() {
        let message = (0..codes.len().max(descriptions.len()))
            .map(|i| {
                let code = codes.get(i).map_or("", String::as_str);
                let description = descriptions.get(i).map_or("", String::as_str);
                format!("{code} {description}").trim().to_string()
            })
            .collect::<Vec<_>>()
            .join("; ");
        return Err(IssuanceError::Rejected(message));
    }

    let certificate = soap::required_text(body, "certificado")
        .map_err(invalid)?
        .ok_or(IssuanceError::EmptyResponse)?;
    let chain = soap::element_texts(body, "cadenaCertificacion").map_err(invalid)?;

    Ok(IssuedCertificate { chain, certificate })
}

fn invalid(err: XmlError) -> IssuanceError {
    IssuanceError::InvalidResponse(err.to_string())
}
