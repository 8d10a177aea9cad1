//! Chain assembler: turns the root trust artifact, the intermediate and the
//! device certificate into the canonical PEM bundle handed to persistence.
//!
//! Assembly is pure. Given the same inputs and issuance date it produces the
//! same bytes, filename and checksum.

use sha2::{Digest, Sha256};
use time::Date;

use crate::pem_utils::{frame, strip_whitespace};
use crate::request::CertificateRequest;

/// Label of the root trust segment. Not an X.509 label; downstream consumers
/// depend on it verbatim.
pub const ROOT_LABEL: &str = "CMS";
pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// The assembled certificate chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub pem: String,
    pub filename: String,
    /// `sha256:` followed by the lowercase hex digest of `pem`.
    pub checksum: String,
    /// Byte length of `pem`.
    pub size: usize,
}

impl CertificateBundle {
    pub fn as_bytes(&self) -> &[u8] {
        self.pem.as_bytes()
    }

    /// Recomputes checksum and size from the PEM text.
    pub fn verify(&self) -> bool {
        self.checksum == checksum(self.pem.as_bytes()) && self.size == self.pem.len()
    }
}

/// Builds the bundle in the order root, intermediate, leaf.
///
/// Absent or blank segments are skipped. Each payload is stripped of
/// whitespace and re-wrapped at 64 columns.
pub fn assemble(
    root: Option<&str>,
    intermediate: Option<&str>,
    leaf: &str,
    request: &CertificateRequest,
    issued_on: Date,
) -> CertificateBundle {
    let segments = [
        (ROOT_LABEL, root),
        (CERTIFICATE_LABEL, intermediate),
        (CERTIFICATE_LABEL, Some(leaf)),
    ];

    let pem: String = segments
        .into_iter()
        .filter_map(|(label, payload)| payload.map(|p| (label, p)))
        .filter(|(_, payload)| !strip_whitespace(payload).is_empty())
        .map(|(label, payload)| frame(label, payload))
        .collect();

    CertificateBundle {
        filename: filename(request, issued_on),
        checksum: checksum(pem.as_bytes()),
        size: pem.len(),
        pem,
    }
}

/// `SE{manufacturer}{model}{serial padded to 10}-{YYYY-MM-DD}.pem`
pub fn filename(request: &CertificateRequest, issued_on: Date) -> String {
    format!(
        "SE{}{}{}-{:04}-{:02}-{:02}.pem",
        request.manufacturer_code,
        request.model_code,
        request.padded_serial(),
        issued_on.year(),
        u8::from(issued_on.month()),
        issued_on.day()
    )
}

pub fn checksum(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Month;

    fn request(serial: &str) -> CertificateRequest {
        CertificateRequest::builder()
            .manufacturer_code("SH")
            .model_code("IA")
            .serial_number(serial)
            .tax_id("20123456786")
            .build()
    }

    fn day() -> Date {
        Date::from_calendar_date(2026, Month::March, 5).unwrap()
    }

    #[test]
    fn filename_pattern() {
        assert_eq!(filename(&request("1234"), day()), "SESHIA0000001234-2026-03-05.pem");
        assert_eq!(filename(&request("9"), day()), "SESHIA0000000009-2026-03-05.pem");
        assert_eq!(filename(&request("1234567890"), day()), "SESHIA1234567890-2026-03-05.pem");
    }

    #[test]
    fn segments_in_canonical_order() {
        let bundle = assemble(Some("Uk9PVA=="), Some("SU5U"), "TEVBRg==", &request("1"), day());
        assert_eq!(
            bundle.pem,
            "-----BEGIN CMS-----\nUk9PVA==\n-----END CMS-----\n\
             -----BEGIN CERTIFICATE-----\nSU5U\n-----END CERTIFICATE-----\n\
             -----BEGIN CERTIFICATE-----\nTEVBRg==\n-----END CERTIFICATE-----\n"
        );
        assert!(bundle.verify());
    }

    #[test]
    fn leaf_only() {
        let bundle = assemble(None, None, "TEVBRg==", &request("1"), day());
        assert_eq!(bundle.pem.matches("-----BEGIN CERTIFICATE-----").count(), 1);
        assert!(!bundle.pem.contains("CMS"));
    }

    #[test]
    fn missing_intermediate_keeps_order() {
        let bundle = assemble(Some("Uk9PVA=="), Some("  \n"), "TEVBRg==", &request("1"), day());
        let cms = bundle.pem.find("BEGIN CMS").unwrap();
        let cert = bundle.pem.find("BEGIN CERTIFICATE").unwrap();
        assert!(cms < cert);
        assert_eq!(bundle.pem.matches("BEGIN CERTIFICATE").count(), 1);
    }

    #[test]
    fn checksum_and_size_are_deterministic() {
        let a = assemble(Some("Uk9PVA=="), None, "TEVBRg==", &request("77"), day());
        let b = assemble(Some("Uk9PVA=="), None, "TEVBRg==", &request("77"), day());
        assert_eq!(a, b);
        assert_eq!(a.size, a.pem.len());
        assert!(a.checksum.starts_with("sha256:"));
        assert_eq!(a.checksum.len(), "sha256:".len() + 64);

        let mut tampered = a.clone();
        tampered.pem.push('\n');
        assert!(!tampered.verify());
    }

    #[test]
    fn checksum_of_empty_input() {
        assert_eq!(
            checksum(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
