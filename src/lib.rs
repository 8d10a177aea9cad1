//! # wscert-pipeline - Device Certificate Issuance for AFIP Web Services
//!
//! This crate issues device certificates through the Argentine tax authority's
//! web services. It opens a PKCS#12 credential, signs a login ticket request
//! (TRA) as CMS `SignedData`, exchanges it at WSAA for a time-boxed access
//! ticket, asks WSCert for a certificate and reassembles the returned chain
//! into a canonical PEM bundle with a checksum and a deterministic filename.
//!
//! Cryptography is done with the rustcrypto libraries (`cms`, `x509-cert`,
//! `rsa`, `p256`). `openssl` is used only to open the PKCS#12 container.
//!
//! ## Supported Key Types
//!
//! - **RSA**: PKCS#1 v1.5 signatures over SHA-256
//! - **ECDSA**: P-256
//!
//! ## Key Features
//!
//! - **Single-flight tickets**: concurrent issuances share one WSAA login
//! - **Bounded retries**: network failures are retried with exponential backoff
//! - **Stable error codes**: every failure maps to one [`error::PipelineError`]
//! - **Redacted secrets**: tokens and signs only ever print an 8-character prefix
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wscert_pipeline::{
//!     config::PipelineConfig,
//!     pipeline::CertificatePipeline,
//!     request::CertificateRequest,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::from_file("/etc/wscert/pipeline.json")?;
//! let pipeline = CertificatePipeline::from_config(config)?;
//!
//! let request = CertificateRequest::builder()
//!     .manufacturer_code("SH")
//!     .model_code("IA")
//!     .serial_number("1234")
//!     .tax_id("20123456786")
//!     .build();
//!
//! let bundle = pipeline.issue_certificate(&request).await?;
//! println!("{} ({} bytes, {})", bundle.filename, bundle.size, bundle.checksum);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use wscert_pipeline::error::{PipelineError, ValidationError};
//!
//! let err = PipelineError::from(ValidationError::InvalidSerial("12a".into()));
//! match err {
//!     PipelineError::Validation(e) => println!("rejected before any network call: {e}"),
//!     PipelineError::Transient(e) => println!("gave up after {} attempts", e.attempts),
//!     e => println!("{}: {e}", e.code()),
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`pipeline`]: The orchestrator and the root trust collaborator
//! - [`credential`]: PKCS#12 loading and subject metadata
//! - [`tra`]: Login ticket requests
//! - [`signer`]: CMS signing
//! - [`cache`]: The single-flight ticket cache
//! - [`wsaa`] and [`wscert`]: SOAP clients for the two services
//! - [`chain`]: PEM bundle assembly
//! - [`config`]: Configuration and retry policy
//! - [`error`]: Error types and codes

pub mod cache;
pub mod chain;
pub mod clock;
pub mod config;
pub mod credential;
pub mod error;
pub mod key;
pub mod pem_utils;
pub mod pipeline;
pub mod request;
pub mod sensitive;
pub mod signer;
pub mod soap;
pub mod ticket;
pub mod tra;
pub mod wsaa;
pub mod wscert;

pub use chain::CertificateBundle;
pub use error::PipelineError;
pub use pipeline::CertificatePipeline;
pub use request::CertificateRequest;
