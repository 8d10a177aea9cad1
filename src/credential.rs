//! Credential loader: opens the PKCS#12 container holding the WSAA signing
//! certificate and its private key.
//!
//! The container is re-parsed for every ticket refresh so the private key only
//! lives in memory for the duration of one signing operation.

use std::fmt;
use std::path::Path;

use der::{Decode, Encode};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::Id;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use x509_cert::Certificate;
use zeroize::Zeroizing;

use crate::config::CredentialConfig;
use crate::error::{ConfigurationError, CredentialError};
use crate::key::KeyPair;

/// Certificate and private key taken from a PKCS#12 container.
///
/// Never persisted. Dropping the bundle zeroizes the key.
pub struct CredentialBundle {
    certificate: Certificate,
    key: KeyPair,
    metadata: SubjectMetadata,
}

impl CredentialBundle {
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn key(&self) -> &KeyPair {
        &self.key
    }

    pub fn metadata(&self) -> &SubjectMetadata {
        &self.metadata
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("subject", &self.metadata.subject)
            .field("key", &self.key)
            .finish()
    }
}

/// Identity and validity of the signing certificate, as consumed by the
/// external expiry monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectMetadata {
    /// RFC 4514 rendering of the subject name.
    pub subject: String,
    /// RFC 4514 rendering of the issuer name.
    pub issuer: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    /// Lowercase hex SHA-256 of the certificate DER.
    pub fingerprint: String,
}

impl SubjectMetadata {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.not_after
    }

    pub fn expires_within(&self, now: OffsetDateTime, window: Duration) -> bool {
        now + window >= self.not_after
    }
}

/// Opens a PKCS#12 container.
///
/// An empty password is only accepted by containers built without
/// encryption; encrypted containers answer it with
/// [`CredentialError::BadPassword`].
pub fn load(container: &[u8], password: &SecretString) -> Result<CredentialBundle, CredentialError> {
    let pkcs12 =
        Pkcs12::from_der(container).map_err(|e| CredentialError::Malformed(e.to_string()))?;
    let parsed = pkcs12
        .parse2(password.expose_secret())
        .map_err(|_| CredentialError::BadPassword)?;

    // Without a key openssl files the certificate under `ca`, so look for the
    // key first.
    let pkey = parsed
        .pkey
        .ok_or(CredentialError::MissingKeyOrCert("private key"))?;
    let cert = parsed
        .cert
        .ok_or(CredentialError::MissingKeyOrCert("certificate"))?;

    let pkcs8 = Zeroizing::new(
        pkey.private_key_to_pkcs8()
            .map_err(|e| CredentialError::Malformed(e.to_string()))?,
    );
    let key = match pkey.id() {
        Id::RSA => KeyPair::rsa_from_pkcs8_der(&pkcs8)?,
        Id::EC => KeyPair::p256_from_pkcs8_der(&pkcs8).map_err(|_| {
            CredentialError::UnsupportedKey("EC keys must use the P-256 curve".to_string())
        })?,
        other => {
            return Err(CredentialError::UnsupportedKey(format!(
                "key type {}",
                other.as_raw()
            )));
        }
    };

    let cert_der = cert
        .to_der()
        .map_err(|e| CredentialError::Malformed(e.to_string()))?;
    let certificate =
        Certificate::from_der(&cert_der).map_err(|e| CredentialError::Malformed(e.to_string()))?;
    if !key.matches(&certificate.tbs_certificate.subject_public_key_info)? {
        return Err(CredentialError::KeyMismatch);
    }
    let metadata = subject_metadata_of(&certificate)?;

    debug!(subject = %metadata.subject, algorithm = ?key.algorithm(), "credential loaded");

    Ok(CredentialBundle {
        certificate,
        key,
        metadata,
    })
}

/// Subject, issuer, validity and fingerprint of a loaded bundle.
pub fn subject_metadata(bundle: &CredentialBundle) -> SubjectMetadata {
    bundle.metadata.clone()
}

fn subject_metadata_of(certificate: &Certificate) -> Result<SubjectMetadata, CredentialError> {
    let tbs = &certificate.tbs_certificate;
    let der = certificate
        .to_der()
        .map_err(|e| CredentialError::Malformed(e.to_string()))?;

    Ok(SubjectMetadata {
        subject: tbs.subject.to_string(),
        issuer: tbs.issuer.to_string(),
        not_before: to_offset_date_time(tbs.validity.not_before)?,
        not_after: to_offset_date_time(tbs.validity.not_after)?,
        fingerprint: hex::encode(Sha256::digest(&der)),
    })
}

fn to_offset_date_time(t: x509_cert::time::Time) -> Result<OffsetDateTime, CredentialError> {
    let secs = t.to_unix_duration().as_secs();
    i64::try_from(secs)
        .ok()
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .ok_or_else(|| CredentialError::Malformed(format!("validity out of range: {t:?}")))
}

/// The PKCS#12 container and its password, held for the lifetime of the
/// pipeline. The container bytes are zeroized on drop.
pub struct CredentialSource {
    container: Zeroizing<Vec<u8>>,
    password: SecretString,
}

impl CredentialSource {
    pub fn new(container: Vec<u8>, password: SecretString) -> Self {
        Self {
            container: Zeroizing::new(container),
            password,
        }
    }

    pub fn from_file(
        path: impl AsRef<Path>,
        password: SecretString,
    ) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let container = std::fs::read(path).map_err(|e| {
            ConfigurationError::Invalid(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(Self::new(container, password))
    }

    /// Reads the container path and the password environment variable named
    /// in the configuration.
    pub fn from_config(config: &CredentialConfig) -> Result<Self, ConfigurationError> {
        let password = std::env::var(&config.password_env).map_err(|_| {
            ConfigurationError::Invalid(format!(
                "environment variable {} is not set",
                config.password_env
            ))
        })?;
        Self::from_file(&config.pkcs12_path, SecretString::new(password.into()))
    }

    /// Parses the container again and returns a fresh bundle.
    pub fn load(&self) -> Result<CredentialBundle, CredentialError> {
        load(&self.container, &self.password)
    }
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSource")
            .field("container_len", &self.container.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_is_malformed() {
        let password = SecretString::new("secret".into());
        let err = load(b"definitely not asn.1", &password).unwrap_err();
        assert!(matches!(err, CredentialError::Malformed(_)));
    }

    #[test]
    fn expiry_window() {
        let not_after = OffsetDateTime::from_unix_timestamp(1_800_000_000).unwrap();
        let metadata = SubjectMetadata {
            subject: "CN=test".into(),
            issuer: "CN=ca".into(),
            not_before: not_after - Duration::days(365),
            not_after,
            fingerprint: String::new(),
        };

        let now = not_after - Duration::days(10);
        assert!(!metadata.is_expired(now));
        assert!(metadata.expires_within(now, Duration::days(30)));
        assert!(!metadata.expires_within(now, Duration::days(5)));
        assert!(metadata.is_expired(not_after));
    }
}
