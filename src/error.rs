//! Error types for the issuance pipeline.
//!
//! Every component reports its own error enum. The orchestrator folds them into
//! [`PipelineError`], whose four variants form the public taxonomy and carry a
//! stable [`code`](PipelineError::code).
//!
//! ```rust
//! use wscert_pipeline::error::{ConfigurationError, CredentialError, PipelineError};
//!
//! let err: PipelineError = CredentialError::BadPassword.into();
//! assert_eq!(err.code(), "CONFIG_BAD_PASSWORD");
//! assert!(matches!(err, PipelineError::Configuration(ConfigurationError::BadPassword)));
//! ```

use thiserror::Error;

/// Errors raised while opening a PKCS#12 container.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The container is not valid ASN.1 / PKCS#12.
    #[error("Malformed PKCS#12 container: {0}")]
    Malformed(String),

    /// MAC verification or decryption failed.
    #[error("PKCS#12 password rejected")]
    BadPassword,

    /// The container lacks a private key or a certificate.
    #[error("PKCS#12 container has no {0}")]
    MissingKeyOrCert(&'static str),

    /// The private key uses an algorithm this crate cannot sign with.
    #[error("Unsupported private key: {0}")]
    UnsupportedKey(String),

    #[error("Private key does not match the certificate")]
    KeyMismatch,
}

/// Errors raised by the CMS signer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignError {
    #[error("Signing credential unavailable: {0}")]
    CredentialUnavailable(#[from] CredentialError),

    #[error("CMS signing failed: {0}")]
    SigningFailed(String),
}

/// Errors raised by the transport carrying SOAP envelopes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Transport failure: {0}")]
pub struct TransportError(pub String);

/// Errors raised while reading remote XML.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Malformed XML: {0}")]
pub struct XmlError(pub String);

impl From<quick_xml::Error> for XmlError {
    fn from(err: quick_xml::Error) -> Self {
        XmlError(err.to_string())
    }
}

/// Errors raised by the WSAA authentication client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("WSAA unreachable: {0}")]
    Network(String),

    #[error("Invalid WSAA response: {0}")]
    InvalidResponse(String),

    #[error("WSAA rejected the login ({code}): {message}")]
    Rejected { code: String, message: String },
}

/// Errors raised by the WSCert issuance client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IssuanceError {
    #[error("WSCert unreachable: {0}")]
    Network(String),

    #[error("WSCert rejected the request: {0}")]
    Rejected(String),

    #[error("WSCert returned no certificate")]
    EmptyResponse,

    #[error("Invalid WSCert response: {0}")]
    InvalidResponse(String),
}

/// A certificate request failed its invariants. Raised before any network call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Serial number must be 1 to 10 decimal digits, got {0:?}")]
    InvalidSerial(String),

    #[error("Unknown model code {0:?}")]
    UnknownModel(String),

    #[error("Manufacturer code must be {expected:?}, got {actual:?}")]
    ManufacturerMismatch { expected: String, actual: String },

    #[error("Invalid CUIT {0:?}")]
    InvalidTaxId(String),
}

/// Fatal faults in local setup: credentials, root trust, settings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Malformed PKCS#12 container: {0}")]
    MalformedContainer(String),

    #[error("PKCS#12 password rejected")]
    BadPassword,

    #[error("PKCS#12 container has no {0}")]
    MissingKeyOrCert(&'static str),

    #[error("Unsupported private key: {0}")]
    UnsupportedKey(String),

    #[error("Private key does not match the certificate")]
    KeyMismatch,

    #[error("Signing credential expired at {0}")]
    CredentialExpired(String),

    #[error("CMS signing failed: {0}")]
    SigningFailed(String),

    #[error("Root trust file unavailable: {0}")]
    MissingRootFile(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// The remote side answered, but not with something usable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid response from {service}: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },

    #[error("{service} rejected the request ({code}): {message}")]
    Rejected {
        service: &'static str,
        code: String,
        message: String,
    },

    #[error("WSCert returned no certificate")]
    EmptyResponse,

    #[error("Issued certificate is not valid X.509: {0}")]
    InvalidCertificate(String),
}

/// Network-level failure. Retried by the orchestrator before surfacing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{service} unreachable after {attempts} attempt(s): {message}")]
pub struct TransientError {
    pub service: &'static str,
    pub message: String,
    pub attempts: u32,
}

/// The single error type returned by [`crate::pipeline::CertificatePipeline`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transient(#[from] TransientError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A background ticket refresh or WSCert call vanished without a result.
    #[error("Background task aborted: {0}")]
    Aborted(String),
}

impl PipelineError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Configuration(e) => match e {
                ConfigurationError::MalformedContainer(_) => "CONFIG_MALFORMED_CONTAINER",
                ConfigurationError::BadPassword => "CONFIG_BAD_PASSWORD",
                ConfigurationError::MissingKeyOrCert(_) => "CONFIG_MISSING_KEY_OR_CERT",
                ConfigurationError::UnsupportedKey(_) => "CONFIG_UNSUPPORTED_KEY",
                ConfigurationError::KeyMismatch => "CONFIG_KEY_MISMATCH",
                ConfigurationError::CredentialExpired(_) => "CONFIG_CREDENTIAL_EXPIRED",
                ConfigurationError::SigningFailed(_) => "CONFIG_SIGNING_FAILED",
                ConfigurationError::MissingRootFile(_) => "CONFIG_MISSING_ROOT_FILE",
                ConfigurationError::Invalid(_) => "CONFIG_INVALID",
            },
            PipelineError::Protocol(e) => match e {
                ProtocolError::InvalidResponse { .. } => "PROTOCOL_INVALID_RESPONSE",
                ProtocolError::Rejected { .. } => "PROTOCOL_REJECTED",
                ProtocolError::EmptyResponse => "PROTOCOL_EMPTY_RESPONSE",
                ProtocolError::InvalidCertificate(_) => "PROTOCOL_INVALID_CERTIFICATE",
            },
            PipelineError::Transient(_) => "TRANSIENT_NETWORK",
            PipelineError::Validation(e) => match e {
                ValidationError::InvalidSerial(_) => "VALIDATION_INVALID_SERIAL",
                ValidationError::UnknownModel(_) => "VALIDATION_UNKNOWN_MODEL",
                ValidationError::ManufacturerMismatch { .. } => {
                    "VALIDATION_MANUFACTURER_MISMATCH"
                }
                ValidationError::InvalidTaxId(_) => "VALIDATION_INVALID_TAX_ID",
            },
            PipelineError::Aborted(_) => "INTERNAL_ABORTED",
        }
    }

    /// Whether the orchestrator may retry the failed step.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }

    /// Records how many attempts were spent on a transient failure.
    pub(crate) fn with_attempts(self, attempts: u32) -> Self {
        match self {
            PipelineError::Transient(t) => {
                PipelineError::Transient(TransientError { attempts, ..t })
            }
            other => other,
        }
    }
}

impl From<CredentialError> for ConfigurationError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Malformed(msg) => ConfigurationError::MalformedContainer(msg),
            CredentialError::BadPassword => ConfigurationError::BadPassword,
            CredentialError::MissingKeyOrCert(what) => ConfigurationError::MissingKeyOrCert(what),
            CredentialError::UnsupportedKey(msg) => ConfigurationError::UnsupportedKey(msg),
            CredentialError::KeyMismatch => ConfigurationError::KeyMismatch,
        }
    }
}

impl From<CredentialError> for PipelineError {
    fn from(err: CredentialError) -> Self {
        PipelineError::Configuration(err.into())
    }
}

impl From<SignError> for PipelineError {
    fn from(err: SignError) -> Self {
        match err {
            SignError::CredentialUnavailable(e) => e.into(),
            SignError::SigningFailed(msg) => {
                PipelineError::Configuration(ConfigurationError::SigningFailed(msg))
            }
        }
    }
}

impl From<AuthError> for PipelineError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Network(message) => PipelineError::Transient(TransientError {
                service: "wsaa",
                message,
                attempts: 1,
            }),
            AuthError::InvalidResponse(message) => {
                PipelineError::Protocol(ProtocolError::InvalidResponse {
                    service: "wsaa",
                    message,
                })
            }
            AuthError::Rejected { code, message } => {
                PipelineError::Protocol(ProtocolError::Rejected {
                    service: "wsaa",
                    code,
                    message,
                })
            }
        }
    }
}

impl From<IssuanceError> for PipelineError {
    fn from(err: IssuanceError) -> Self {
        match err {
            IssuanceError::Network(message) => PipelineError::Transient(TransientError {
                service: "wscert",
                message,
                attempts: 1,
            }),
            IssuanceError::Rejected(message) => PipelineError::Protocol(ProtocolError::Rejected {
                service: "wscert",
                code: "wscert.rejected".to_string(),
                message,
            }),
            IssuanceError::EmptyResponse => PipelineError::Protocol(ProtocolError::EmptyResponse),
            IssuanceError::InvalidResponse(message) => {
                PipelineError::Protocol(ProtocolError::InvalidResponse {
                    service: "wscert",
                    message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_failures_are_the_only_retryable_errors() {
        let transient: PipelineError = AuthError::Network("timeout".into()).into();
        let rejected: PipelineError = AuthError::Rejected {
            code: "ns1:coe.alreadyAuthenticated".into(),
            message: "ticket still valid".into(),
        }
        .into();
        let empty: PipelineError = IssuanceError::EmptyResponse.into();

        assert!(transient.is_retryable());
        assert!(!rejected.is_retryable());
        assert!(!empty.is_retryable());
        assert_eq!(rejected.code(), "PROTOCOL_REJECTED");
        assert_eq!(empty.code(), "PROTOCOL_EMPTY_RESPONSE");
    }

    #[test]
    fn attempts_are_recorded_on_transient_errors_only() {
        let err: PipelineError = IssuanceError::Network("reset".into()).into();
        match err.with_attempts(3) {
            PipelineError::Transient(t) => {
                assert_eq!(t.attempts, 3);
                assert_eq!(t.service, "wscert");
            }
            other => panic!("unexpected {other:?}"),
        }

        let err: PipelineError = ValidationError::UnknownModel("ZZ".into()).into();
        assert_eq!(err.clone().with_attempts(3), err);
    }

    #[test]
    fn signing_errors_fold_into_configuration() {
        let err: PipelineError = SignError::CredentialUnavailable(CredentialError::BadPassword).into();
        assert_eq!(err, PipelineError::Configuration(ConfigurationError::BadPassword));

        let err: PipelineError = SignError::SigningFailed("key mismatch".into()).into();
        assert_eq!(err.code(), "CONFIG_SIGNING_FAILED");
    }
}
