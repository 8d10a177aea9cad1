//! SOAP 1.1 plumbing shared by the WSAA and WSCert clients: the transport
//! seam, envelope framing, fault detection and a small namespace-tolerant XML
//! reader.

use std::time::Duration;

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::trace;

use crate::error::{TransportError, XmlError};

pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Raw HTTP answer to a SOAP call. SOAP faults usually arrive with status 500,
/// so the body is kept regardless of status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapResponse {
    pub status: u16,
    pub body: String,
}

impl SoapResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Statuses worth another attempt when no fault explains them.
    pub fn is_retryable_status(&self) -> bool {
        self.status >= 500 || self.status == 408 || self.status == 429
    }

    /// The SOAP fault in the body, if any.
    ///
    /// Proxies in front of the services answer outages with HTML error pages
    /// that are not well-formed XML. On a non-2xx status such a body carries
    /// no fault and the status decides.
    pub fn fault(&self) -> Result<Option<Fault>, XmlError> {
        match fault(&self.body) {
            Err(_) if !self.is_success() => Ok(None),
            other => other,
        }
    }
}

/// Carries a SOAP envelope to an endpoint.
#[async_trait]
pub trait SoapTransport: Send + Sync {
    async fn post(
        &self,
        endpoint: &str,
        action: &str,
        envelope: String,
    ) -> Result<SoapResponse, TransportError>;
}

/// HTTPS transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SoapTransport for HttpTransport {
    async fn post(
        &self,
        endpoint: &str,
        action: &str,
        envelope: String,
    ) -> Result<SoapResponse, TransportError> {
        let response = self
            .client
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", action)
            .body(envelope)
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        trace!(endpoint, status, len = body.len(), "soap response");
        Ok(SoapResponse { status, body })
    }
}

/// Wraps `body` in a SOAP 1.1 envelope declaring the operation namespace as
/// `prefix`.
pub fn envelope(prefix: &str, namespace: &str, body: &str) -> String {
    format!(
        "<soapenv:Envelope xmlns:soapenv=\"{SOAP_ENV_NS}\" xmlns:{prefix}=\"{namespace}\">\
         <soapenv:Header/><soapenv:Body>{body}</soapenv:Body></soapenv:Envelope>"
    )
}

/// A SOAP fault reported by the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub code: String,
    pub message: String,
}

/// Returns the fault carried by `xml`, if any.
pub fn fault(xml: &str) -> Result<Option<Fault>, XmlError> {
    if first_text(xml, "Fault")?.is_none() {
        return Ok(None);
    }
    Ok(Some(Fault {
        code: first_text(xml, "faultcode")?.unwrap_or_default(),
        message: first_text(xml, "faultstring")?.unwrap_or_default(),
    }))
}

/// Text content of every element whose local name is `name`, in document
/// order. Namespace prefixes are ignored, entities are unescaped and
/// surrounding whitespace is trimmed. Nested elements contribute their text.
pub fn element_texts(xml: &str, name: &str) -> Result<Vec<String>, XmlError> {
    let mut reader = Reader::from_str(xml);
    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut capture: Option<(usize, String)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                depth += 1;
                if capture.is_none() && e.local_name().as_ref() == name.as_bytes() {
                    capture = Some((depth, String::new()));
                }
            }
            Event::Empty(e) => {
                if capture.is_none() && e.local_name().as_ref() == name.as_bytes() {
                    found.push(String::new());
                }
            }
            Event::Text(t) => {
                if let Some((_, text)) = capture.as_mut() {
                    text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some((_, text)) = capture.as_mut() {
                    let raw = c.into_inner();
                    text.push_str(
                        std::str::from_utf8(&raw).map_err(|e| XmlError(e.to_string()))?,
                    );
                }
            }
            Event::End(_) => {
                if matches!(capture, Some((d, _)) if d == depth) {
                    if let Some((_, text)) = capture.take() {
                        found.push(text.trim().to_string());
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if capture.is_some() {
        return Err(XmlError(format!("unterminated <{name}> element")));
    }
    Ok(found)
}

/// Text of the first element named `name`.
pub fn first_text(xml: &str, name: &str) -> Result<Option<String>, XmlError> {
    Ok(element_texts(xml, name)?.into_iter().next())
}

/// Text of the first element named `name`, treating an absent or blank
/// element as missing.
pub fn required_text(xml: &str, name: &str) -> Result<Option<String>, XmlError> {
    Ok(first_text(xml, name)?.filter(|s| !s.is_empty()))
}
