//! Pipeline configuration, loadable from JSON.
//!
//! Every tunable has a default; only the endpoint of the issuance service, the
//! two CUITs and the credential location must be supplied.

use std::future::Future;
use std::path::{Path, PathBuf};

use bon::Builder;
use serde::{Deserialize, Serialize};
use time::{Duration, UtcOffset};
use tracing::warn;

use crate::error::{ConfigurationError, PipelineError};
use crate::request::{DevicePolicy, is_valid_cuit};

pub const TESTING_WSAA_URL: &str = "https://wsaahomo.afip.gov.ar/ws/services/LoginCms";
pub const PRODUCTION_WSAA_URL: &str = "https://wsaa.afip.gov.ar/ws/services/LoginCms";

/// Which deployment of the authentication service to talk to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Homologation.
    #[default]
    Testing,
    Production,
}

impl Environment {
    pub fn wsaa_url(self) -> &'static str {
        match self {
            Environment::Testing => TESTING_WSAA_URL,
            Environment::Production => PRODUCTION_WSAA_URL,
        }
    }
}

/// Where the signing credential lives.
#[derive(Clone, Debug, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(on(String, into))]
pub struct CredentialConfig {
    #[builder(into)]
    pub pkcs12_path: PathBuf,
    /// Name of the environment variable holding the container password.
    #[serde(default = "default_password_env")]
    #[builder(default = default_password_env())]
    pub password_env: String,
}

fn default_password_env() -> String {
    "WSCERT_PKCS12_PASSWORD".to_string()
}

/// Bounded exponential backoff for transient failures.
#[derive(Clone, Debug, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    #[builder(default = 3)]
    pub max_attempts: u32,
    #[builder(default = 500)]
    pub initial_backoff_ms: u64,
    #[builder(default = 5000)]
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 5000,
        }
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds, fails with a non-retryable error, or
    /// `max_attempts` is spent. The final transient error records the number
    /// of attempts made.
    pub async fn run<T, F, Fut>(&self, service: &'static str, mut op: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut backoff_ms = self.initial_backoff_ms;
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(service, attempt, backoff_ms, error = %e, "transient failure, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    backoff_ms = backoff_ms.saturating_mul(2).min(self.max_backoff_ms);
                    attempt += 1;
                }
                Err(e) => return Err(e.with_attempts(attempt)),
            }
        }
    }
}

/// Settings for [`crate::pipeline::CertificatePipeline`].
///
/// ```rust
/// use wscert_pipeline::config::{Environment, PipelineConfig};
///
/// let config: PipelineConfig = serde_json::from_str(r#"{
///     "wscert_url": "https://wscerthomo.example/ws/services/WSCert",
///     "tax_id": "20123456786",
///     "manufacturer_id": "30712345671",
///     "credential": { "pkcs12_path": "/etc/wscert/credential.p12" }
/// }"#).unwrap();
///
/// assert_eq!(config.environment, Environment::Testing);
/// assert_eq!(config.service_name, "wscert");
/// assert_eq!(config.retry.max_attempts, 3);
/// config.validate().unwrap();
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(on(String, into))]
pub struct PipelineConfig {
    #[serde(default)]
    #[builder(default)]
    pub environment: Environment,
    /// Overrides the environment's WSAA endpoint.
    #[serde(default)]
    pub wsaa_url: Option<String>,
    pub wscert_url: String,
    #[serde(default = "default_service_name")]
    #[builder(default = default_service_name())]
    pub service_name: String,
    /// CUIT of the represented taxpayer.
    pub tax_id: String,
    /// CUIT of the device manufacturer.
    pub manufacturer_id: String,
    #[serde(default)]
    #[builder(default)]
    pub device: DevicePolicy,
    #[serde(default = "default_tra_window_secs")]
    #[builder(default = default_tra_window_secs())]
    pub tra_window_secs: u64,
    #[serde(default = "default_ticket_safety_margin_secs")]
    #[builder(default = default_ticket_safety_margin_secs())]
    pub ticket_safety_margin_secs: u64,
    #[serde(default = "default_ticket_validity_secs")]
    #[builder(default = default_ticket_validity_secs())]
    pub default_ticket_validity_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    #[builder(default = default_request_timeout_secs())]
    pub request_timeout_secs: u64,
    /// Offset the TRA timestamps are rendered in.
    #[serde(default = "default_utc_offset_hours")]
    #[builder(default = default_utc_offset_hours())]
    pub utc_offset_hours: i8,
    #[serde(default)]
    #[builder(default)]
    pub retry: RetryPolicy,
    pub credential: CredentialConfig,
    /// File whose content becomes the `CMS` segment of every bundle.
    #[serde(default)]
    #[builder(into)]
    pub root_trust_path: Option<PathBuf>,
}

fn default_service_name() -> String {
    "wscert".to_string()
}

fn default_tra_window_secs() -> u64 {
    600
}

fn default_ticket_safety_margin_secs() -> u64 {
    60
}

fn default_ticket_validity_secs() -> u64 {
    43_200
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_utc_offset_hours() -> i8 {
    -3
}

impl PipelineConfig {
    /// Reads and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::Invalid(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            ConfigurationError::Invalid(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |msg: String| Err(ConfigurationError::Invalid(msg));

        if self.wscert_url.trim().is_empty() {
            return invalid("wscert_url is empty".into());
        }
        if self.wsaa_url.as_deref().is_some_and(|u| u.trim().is_empty()) {
            return invalid("wsaa_url is empty".into());
        }
        if self.service_name.trim().is_empty() {
            return invalid("service_name is empty".into());
        }
        if !is_valid_cuit(&self.tax_id) {
            return invalid(format!("tax_id {:?} is not a valid CUIT", self.tax_id));
        }
        if !is_valid_cuit(&self.manufacturer_id) {
            return invalid(format!(
                "manufacturer_id {:?} is not a valid CUIT",
                self.manufacturer_id
            ));
        }
        if self.device.manufacturer_code.is_empty() {
            return invalid("device.manufacturer_code is empty".into());
        }
        if self.device.model_codes.is_empty() {
            return invalid("device.model_codes is empty".into());
        }
        if self.tra_window_secs == 0 {
            return invalid("tra_window_secs must be positive".into());
        }
        if self.default_ticket_validity_secs <= self.ticket_safety_margin_secs {
            return invalid(
                "default_ticket_validity_secs must exceed ticket_safety_margin_secs".into(),
            );
        }
        if self.request_timeout_secs == 0 {
            return invalid("request_timeout_secs must be positive".into());
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".into());
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return invalid("retry.initial_backoff_ms exceeds retry.max_backoff_ms".into());
        }
        self.utc_offset()?;
        Ok(())
    }

    /// The WSAA endpoint: the explicit override or the environment default.
    pub fn wsaa_endpoint(&self) -> &str {
        self.wsaa_url
            .as_deref()
            .unwrap_or_else(|| self.environment.wsaa_url())
    }

    pub fn tra_window(&self) -> Duration {
        Duration::seconds(saturating_i64(self.tra_window_secs))
    }

    pub fn ticket_safety_margin(&self) -> Duration {
        Duration::seconds(saturating_i64(self.ticket_safety_margin_secs))
    }

    pub fn default_ticket_validity(&self) -> Duration {
        Duration::seconds(saturating_i64(self.default_ticket_validity_secs))
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn utc_offset(&self) -> Result<UtcOffset, ConfigurationError> {
        UtcOffset::from_hms(self.utc_offset_hours, 0, 0).map_err(|e| {
            ConfigurationError::Invalid(format!(
                "utc_offset_hours {} out of range: {e}",
                self.utc_offset_hours
            ))
        })
    }
}

fn saturating_i64(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}
