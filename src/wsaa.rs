//! WSAA authentication client: trades a CMS-signed TRA for an access ticket.

use std::sync::Arc;

use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{AuthError, XmlError};
use crate::soap::{self, SoapTransport};
use crate::ticket::SecurityTicket;

pub const WSAA_NAMESPACE: &str = "http://wsaa.view.sua.dvadac.desein.afip.gov";

/// Client for the `loginCms` operation.
pub struct AuthClient {
    transport: Arc<dyn SoapTransport>,
    endpoint: String,
    clock: Arc<dyn Clock>,
    default_validity: Duration,
}

impl AuthClient {
    /// `default_validity` applies when a response omits `expirationTime`.
    pub fn new(
        transport: Arc<dyn SoapTransport>,
        endpoint: impl Into<String>,
        clock: Arc<dyn Clock>,
        default_validity: Duration,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            clock,
            default_validity,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends one login. Never retries; network failures come back as
    /// [`AuthError::Network`] for the caller to decide.
    pub async fn authenticate(&self, signed_cms_b64: &str) -> Result<SecurityTicket, AuthError> {
        let body = format!("<wsaa:loginCms><wsaa:in0>{signed_cms_b64}</wsaa:in0></wsaa:loginCms>");
        let envelope = soap::envelope("wsaa", WSAA_NAMESPACE, &body);

        debug!(endpoint = %self.endpoint, "sending loginCms");
        let response = self
            .transport
            .post(&self.endpoint, "", envelope)
            .await
            .map_err(|e| AuthError::Network(e.0))?;

        if let Some(fault) = response.fault().map_err(invalid)? {
            return Err(AuthError::Rejected {
                code: fault.code,
                message: fault.message,
            });
        }
        if !response.is_success() {
            let message = format!("HTTP status {}", response.status);
            return Err(if response.is_retryable_status() {
                AuthError::Network(message)
            } else {
                AuthError::InvalidResponse(message)
            });
        }

        self.parse_ticket(&response.body)
    }

    fn parse_ticket(&self, body: &str) -> Result<SecurityTicket, AuthError> {
        let ticket_xml = soap::required_text(body, "loginCmsReturn")
            .map_err(invalid)?
            .ok_or_else(|| AuthError::InvalidResponse("missing <loginCmsReturn>".into()))?;

        let token = soap::required_text(&ticket_xml, "token")
            .map_err(invalid)?
            .ok_or_else(|| AuthError::InvalidResponse("missing <token>".into()))?;
        let sign = soap::required_text(&ticket_xml, "sign")
            .map_err(invalid)?
            .ok_or_else(|| AuthError::InvalidResponse("missing <sign>".into()))?;

        let expires_at = match soap::required_text(&ticket_xml, "expirationTime").map_err(invalid)? {
            Some(raw) => OffsetDateTime::parse(&raw, &Rfc3339).map_err(|e| {
                AuthError::InvalidResponse(format!("bad expirationTime {raw:?}: {e}"))
            })?,
            None => {
                let fallback = self.clock.now() + self.default_validity;
                warn!(%fallback, "loginTicketResponse has no expirationTime, assuming default validity");
                fallback
            }
        };

        Ok(SecurityTicket::new(token, sign, expires_at))
    }
}

fn invalid(err: XmlError) -> AuthError {
    AuthError::InvalidResponse(err.to_string())
}
