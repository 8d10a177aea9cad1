#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509, X509NameBuilder};
use quick_xml::escape::escape;
use secrecy::SecretString;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};
use wscert_pipeline::config::{CredentialConfig, PipelineConfig, RetryPolicy};
use wscert_pipeline::credential::CredentialSource;
use wscert_pipeline::error::TransportError;
use wscert_pipeline::request::CertificateRequest;
use wscert_pipeline::soap::{SoapResponse, SoapTransport};

pub const PASSWORD: &str = "correct horse battery staple";
pub const WSAA_URL: &str = "https://wsaa.test/ws/services/LoginCms";
pub const WSCERT_URL: &str = "https://wscert.test/ws/services/WSCert";
pub const TAX_ID: &str = "20123456786";
pub const MANUFACTURER_ID: &str = "30712345671";

pub fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

pub fn p256_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

pub fn p384_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::SECP384R1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

/// Self-signed certificate valid from now for `days`.
pub fn self_signed(key: &PKey<Private>, common_name: &str, days: u32) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("C", "AR").unwrap();
    name.append_entry_by_text("O", "Wscert Test").unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(4242).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(days).unwrap())
        .unwrap();
    builder.sign(key, MessageDigest::sha256()).unwrap();
    builder.build()
}

pub fn pkcs12(key: &PKey<Private>, cert: &X509, password: &str) -> Vec<u8> {
    Pkcs12::builder()
        .name("wscert")
        .pkey(key)
        .cert(cert)
        .build2(password)
        .unwrap()
        .to_der()
        .unwrap()
}

pub fn rsa_container() -> (Vec<u8>, X509) {
    let key = rsa_key();
    let cert = self_signed(&key, "wscert rsa", 365);
    (pkcs12(&key, &cert, PASSWORD), cert)
}

pub fn p256_container() -> (Vec<u8>, X509) {
    let key = p256_key();
    let cert = self_signed(&key, "wscert p256", 365);
    (pkcs12(&key, &cert, PASSWORD), cert)
}

pub fn password(value: &str) -> SecretString {
    SecretString::new(value.into())
}

pub fn source(container: Vec<u8>, pw: &str) -> CredentialSource {
    CredentialSource::new(container, password(pw))
}

/// Base64 DER of a fresh self-signed certificate, as WSCert would return it.
pub fn issued_cert_b64(common_name: &str) -> String {
    let key = p256_key();
    STANDARD.encode(self_signed(&key, common_name, 730).to_der().unwrap())
}

/// 2026-10-16 12:00:00 -03:00
pub fn now() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_792_162_800)
        .unwrap()
        .to_offset(UtcOffset::from_hms(-3, 0, 0).unwrap())
}

/// Wall-clock time in the service's offset, whole seconds. Pipeline tests
/// start here so freshly generated credentials are inside their validity.
pub fn current() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(0)
        .unwrap_or(now)
        .to_offset(UtcOffset::from_hms(-3, 0, 0).unwrap())
}

pub fn config() -> PipelineConfig {
    PipelineConfig::builder()
        .wsaa_url(WSAA_URL)
        .wscert_url(WSCERT_URL)
        .tax_id(TAX_ID)
        .manufacturer_id(MANUFACTURER_ID)
        .retry(
            RetryPolicy::builder()
                .max_attempts(3)
                .initial_backoff_ms(1)
                .max_backoff_ms(4)
                .build(),
        )
        .credential(
            CredentialConfig::builder()
                .pkcs12_path("/unused/credential.p12")
                .build(),
        )
        .build()
}

pub fn request(serial: &str) -> CertificateRequest {
    CertificateRequest::builder()
        .manufacturer_code("SH")
        .model_code("IA")
        .serial_number(serial)
        .tax_id(TAX_ID)
        .build()
}

pub fn ok(body: String) -> Result<SoapResponse, TransportError> {
    Ok(SoapResponse { status: 200, body })
}

pub fn status(status: u16, body: &str) -> Result<SoapResponse, TransportError> {
    Ok(SoapResponse {
        status,
        body: body.to_string(),
    })
}

/// The error page nginx serves when the upstream is down. Not well-formed XML.
pub const GATEWAY_PAGE: &str = "<html>\r\n<head><title>502 Bad Gateway</title></head>\r\n<body>\r\n\
<center><h1>502 Bad Gateway</h1></center>\r\n<hr><center>nginx</center>\r\n</body>\r\n</html>\r\n";

pub fn unreachable() -> Result<SoapResponse, TransportError> {
    Err(TransportError("connection reset by peer".into()))
}

/// A `loginCmsResponse` carrying the given credentials.
pub fn wsaa_response(credentials: &str, expires_at: OffsetDateTime) -> String {
    let ticket = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <loginTicketResponse version=\"1.0\"><header>\
         <source>CN=wsaahomo, O=AFIP, C=AR</source>\
         <destination>SERIALNUMBER=CUIT {TAX_ID}, CN=wscert</destination>\
         <uniqueId>1792162800</uniqueId>\
         <generationTime>{}</generationTime>\
         <expirationTime>{}</expirationTime>\
         </header><credentials>{credentials}</credentials></loginTicketResponse>",
        now().format(&Rfc3339).unwrap(),
        expires_at.format(&Rfc3339).unwrap(),
    );
    format!(
        "<soapenv:Envelope xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\" \
         xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\">\
         <soapenv:Body><loginCmsResponse xmlns=\"http://wsaa.view.sua.dvadac.desein.afip.gov\">\
         <loginCmsReturn>{}</loginCmsReturn></loginCmsResponse></soapenv:Body></soapenv:Envelope>",
        escape(ticket.as_str())
    )
}

pub fn ticket_response(token: &str, expires_at: OffsetDateTime) -> String {
    wsaa_response(
        &format!("<token>{token}</token><sign>c2lnbi12YWx1ZQ==</sign>"),
        expires_at,
    )
}

/// A `solicitarCertificadoResponse` with the given chain and certificate.
pub fn wscert_response(chain: &[&str], certificate: &str) -> String {
    let chain: String = chain
        .iter()
        .map(|c| format!("<cadenaCertificacion>{c}</cadenaCertificacion>"))
        .collect();
    format!(
        "<soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\"><soap:Body>\
         <ns2:solicitarCertificadoResponse xmlns:ns2=\"http://ar.gov.afip.dif.wscert/\">\
         <return>{chain}<certificado>{certificate}</certificado></return>\
         </ns2:solicitarCertificadoResponse></soap:Body></soap:Envelope>"
    )
}

pub fn wscert_errors(code: &str, description: &str) -> String {
    format!(
        "<soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\"><soap:Body>\
         <ns2:solicitarCertificadoResponse xmlns:ns2=\"http://ar.gov.afip.dif.wscert/\">\
         <return><errores><error><codigo>{code}</codigo><descripcion>{description}</descripcion>\
         </error></errores></return></ns2:solicitarCertificadoResponse></soap:Body></soap:Envelope>"
    )
}

/// In-memory SOAP transport answering each endpoint from a queue. The last
/// queued response is repeated once the queue is down to one entry.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Result<SoapResponse, TransportError>>>>,
    sent: Mutex<Vec<(String, String)>>,
    answered: Mutex<Vec<String>>,
    delay: Option<StdDuration>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(delay: StdDuration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn push(&self, endpoint: &str, response: Result<SoapResponse, TransportError>) {
        self.routes
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == endpoint)
            .count()
    }

    /// Calls to `endpoint` that got past the delay and were answered.
    pub fn answered(&self, endpoint: &str) -> usize {
        self.answered
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == endpoint)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn envelopes(&self, endpoint: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

#[async_trait]
impl SoapTransport for ScriptedTransport {
    async fn post(
        &self,
        endpoint: &str,
        _action: &str,
        envelope: String,
    ) -> Result<SoapResponse, TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((endpoint.to_string(), envelope));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answered.lock().unwrap().push(endpoint.to_string());

        let mut routes = self.routes.lock().unwrap();
        let queue = routes
            .get_mut(endpoint)
            .ok_or_else(|| TransportError(format!("no script for {endpoint}")))?;
        match queue.len() {
            0 => Err(TransportError(format!("script for {endpoint} is empty"))),
            1 => queue[0].clone(),
            _ => queue.pop_front().unwrap_or_else(unreachable),
        }
    }
}
