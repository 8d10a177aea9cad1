//! The issuance orchestrator.
//!
//! [`CertificatePipeline::issue_certificate`] validates the request, obtains a
//! ticket through the single-flight cache, asks WSCert for the certificate and
//! assembles the PEM bundle. Transient failures are retried here and nowhere
//! else.
//!
//! Remote calls run on spawned tasks. A caller cancelled mid-call only drops
//! the result; the login or issuance still runs to completion.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use der::Decode;
use time::Duration;
use tracing::{debug, error, info, warn};
use x509_cert::Certificate;

use crate::cache::{CacheStatus, TicketCache};
use crate::chain::{self, CERTIFICATE_LABEL, CertificateBundle};
use crate::clock::{Clock, SystemClock};
use crate::config::{PipelineConfig, RetryPolicy};
use crate::credential::CredentialSource;
use crate::error::{ConfigurationError, PipelineError, ProtocolError};
use crate::pem_utils;
use crate::request::CertificateRequest;
use crate::signer;
use crate::soap::{HttpTransport, SoapTransport};
use crate::ticket::SecurityTicket;
use crate::tra::TicketRequest;
use crate::wsaa::AuthClient;
use crate::wscert::{IssuanceClient, IssuedCertificate, IssuedCertificateMaterial};

/// A credential expiring sooner than this is logged at `warn`.
pub const CREDENTIAL_EXPIRY_WARNING: Duration = Duration::days(30);

/// Supplies the root trust artifact placed in the `CMS` segment.
#[async_trait]
pub trait RootTrust: Send + Sync {
    /// `None` means bundles carry no root segment.
    async fn load(&self) -> Result<Option<String>, ConfigurationError>;
}

/// Reads the root trust artifact from disk on every issuance.
#[derive(Debug, Clone)]
pub struct FileRootTrust {
    path: PathBuf,
}

impl FileRootTrust {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RootTrust for FileRootTrust {
    async fn load(&self) -> Result<Option<String>, ConfigurationError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ConfigurationError::MissingRootFile(format!("{}: {e}", self.path.display()))
        })?;
        Ok(Some(content))
    }
}

/// A fixed root trust artifact, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticRootTrust(pub Option<String>);

#[async_trait]
impl RootTrust for StaticRootTrust {
    async fn load(&self) -> Result<Option<String>, ConfigurationError> {
        Ok(self.0.clone())
    }
}

/// Issues device certificates. Share one instance (behind an `Arc`) across
/// tasks so they share the ticket cache.
pub struct CertificatePipeline {
    config: PipelineConfig,
    credentials: Arc<CredentialSource>,
    auth: Arc<AuthClient>,
    issuance: Arc<IssuanceClient>,
    root: Arc<dyn RootTrust>,
    cache: TicketCache,
    clock: Arc<dyn Clock>,
}

impl CertificatePipeline {
    /// Builds a pipeline talking HTTPS, with the credential, root trust file
    /// and clock offset taken from `config`.
    pub fn from_config(config: PipelineConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let credentials = CredentialSource::from_config(&config.credential)?;
        let transport = HttpTransport::new(config.request_timeout())
            .map_err(|e| ConfigurationError::Invalid(e.to_string()))?;
        let root: Arc<dyn RootTrust> = match &config.root_trust_path {
            Some(path) => Arc::new(FileRootTrust::new(path.clone())),
            None => Arc::new(StaticRootTrust(None)),
        };
        let clock = Arc::new(SystemClock::new(config.utc_offset()?));

        Self::with_transport(config, credentials, Arc::new(transport), root, clock)
    }

    /// Builds a pipeline from explicit collaborators.
    pub fn with_transport(
        config: PipelineConfig,
        credentials: CredentialSource,
        transport: Arc<dyn SoapTransport>,
        root: Arc<dyn RootTrust>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let auth = AuthClient::new(
            transport.clone(),
            config.wsaa_endpoint(),
            clock.clone(),
            config.default_ticket_validity(),
        );
        let issuance = IssuanceClient::new(transport, config.wscert_url.clone());
        let cache = TicketCache::new(clock.clone(), config.ticket_safety_margin());

        Ok(Self {
            config,
            credentials: Arc::new(credentials),
            auth: Arc::new(auth),
            issuance: Arc::new(issuance),
            root,
            cache,
            clock,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn ticket_status(&self) -> CacheStatus {
        self.cache.status().await
    }

    /// Drops the cached ticket so the next issuance logs in again.
    pub async fn invalidate_ticket(&self) {
        self.cache.invalidate().await;
    }

    /// Runs the whole issuance for one device. Either a complete, verified
    /// bundle comes back or nothing does.
    pub async fn issue_certificate(
        &self,
        request: &CertificateRequest,
    ) -> Result<CertificateBundle, PipelineError> {
        let result = self.issue(request).await;
        match &result {
            Ok(bundle) => info!(
                filename = %bundle.filename,
                checksum = %bundle.checksum,
                size = bundle.size,
                "certificate issued"
            ),
            Err(e) => error!(
                code = e.code(),
                error = %e,
                model = %request.model_code,
                serial = %request.serial_number,
                "certificate issuance failed"
            ),
        }
        result
    }

    async fn issue(&self, request: &CertificateRequest) -> Result<CertificateBundle, PipelineError> {
        request.validate(&self.config.device)?;
        debug!(model = %request.model_code, serial = %request.padded_serial(), "request validated");

        let root = self.root.load().await?;
        let ticket = self.ticket().await?;
        debug!(token = %ticket.token, "ticket ready");

        // A caller dropped mid-request must not cut the remote call short.
        let issuance = Issuance {
            client: self.issuance.clone(),
            retry: self.config.retry.clone(),
            ticket,
            request: request.clone(),
            tax_id: self.config.tax_id.clone(),
            manufacturer: self.config.manufacturer_id.clone(),
        };
        let issued = tokio::spawn(issuance.run())
            .await
            .map_err(|e| PipelineError::Aborted(e.to_string()))??;

        let material = IssuedCertificateMaterial::new(root, issued);
        let bundle = chain::assemble(
            material.root.as_deref(),
            material.intermediate.as_deref(),
            &material.leaf,
            request,
            self.clock.now().date(),
        );
        verify_bundle(&bundle)?;
        Ok(bundle)
    }

    async fn ticket(&self) -> Result<SecurityTicket, PipelineError> {
        let login = Login {
            credentials: self.credentials.clone(),
            auth: self.auth.clone(),
            clock: self.clock.clone(),
            retry: self.config.retry.clone(),
            service_name: self.config.service_name.clone(),
            window: self.config.tra_window(),
        };
        self.cache.get_or_refresh(move || login.run()).await
    }
}

impl fmt::Debug for CertificatePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificatePipeline")
            .field("wsaa", &self.auth.endpoint())
            .field("wscert", &self.issuance.endpoint())
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

/// One ticket refresh, owned by the cache's background task.
struct Login {
    credentials: Arc<CredentialSource>,
    auth: Arc<AuthClient>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    service_name: String,
    window: Duration,
}

impl Login {
    async fn run(self) -> Result<SecurityTicket, PipelineError> {
        let signed = self.sign_request()?;

        let auth = &*self.auth;
        let signed = signed.as_str();
        self.retry
            .run("wsaa", move || async move {
                auth.authenticate(signed).await.map_err(PipelineError::from)
            })
            .await
    }

    /// Loads the credential, signs a fresh TRA and drops the key.
    fn sign_request(&self) -> Result<String, PipelineError> {
        let now = self.clock.now();
        let bundle = self.credentials.load()?;
        let metadata = bundle.metadata();

        if metadata.is_expired(now) {
            return Err(ConfigurationError::CredentialExpired(metadata.not_after.to_string()).into());
        }
        if metadata.expires_within(now, CREDENTIAL_EXPIRY_WARNING) {
            warn!(
                subject = %metadata.subject,
                not_after = %metadata.not_after,
                "signing credential expires soon"
            );
        }

        let tra = TicketRequest::build(now, &self.service_name, self.window);
        debug!(unique_id = tra.unique_id, service = %tra.service, "signing ticket request");
        Ok(signer::sign(tra.to_xml().as_bytes(), &bundle)?)
    }
}

/// One WSCert request with its retries, owned by a spawned task.
struct Issuance {
    client: Arc<IssuanceClient>,
    retry: RetryPolicy,
    ticket: SecurityTicket,
    request: CertificateRequest,
    tax_id: String,
    manufacturer: String,
}

impl Issuance {
    async fn run(self) -> Result<IssuedCertificate, PipelineError> {
        let client = &*self.client;
        let ticket = &self.ticket;
        let request = &self.request;
        let tax_id = self.tax_id.as_str();
        let manufacturer = self.manufacturer.as_str();
        self.retry
            .run("wscert", move || async move {
                client
                    .issue(ticket, request, tax_id, manufacturer)
                    .await
                    .map_err(PipelineError::from)
            })
            .await
    }
}

/// Re-reads the assembled bundle: every block must parse and the last one must
/// be an X.509 certificate.
fn verify_bundle(bundle: &CertificateBundle) -> Result<(), PipelineError> {
    let invalid = |msg: String| PipelineError::Protocol(ProtocolError::InvalidCertificate(msg));

    let blocks = pem_utils::parse_blocks(&bundle.pem).map_err(|e| invalid(e.to_string()))?;
    let (label, der) = blocks
        .last()
        .ok_or_else(|| invalid("bundle has no PEM blocks".into()))?;
    if label != CERTIFICATE_LABEL {
        return Err(invalid(format!("last block is {label}, expected {CERTIFICATE_LABEL}")));
    }
    Certificate::from_der(der).map_err(|e| invalid(e.to_string()))?;

    if !bundle.verify() {
        return Err(invalid("checksum mismatch".into()));
    }
    Ok(())
}
