//! Login ticket request (TRA) construction.

use quick_xml::escape::escape;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

/// Default half-width of the TRA validity window.
pub const DEFAULT_WINDOW: Duration = Duration::minutes(10);

/// A login ticket request, built fresh for every authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRequest {
    pub unique_id: u64,
    pub generated_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub service: String,
}

impl TicketRequest {
    /// Builds a request valid from exactly `now - window` to `now + window`.
    ///
    /// Two calls within the same second share a `unique_id`. Sub-second
    /// precision only disappears when the request is serialized.
    pub fn build(now: OffsetDateTime, service_name: &str, window: Duration) -> Self {
        let unique_id = u64::try_from(now.unix_timestamp()).unwrap_or_default();

        Self {
            unique_id,
            generated_at: now - window,
            expires_at: now + window,
            service: service_name.to_string(),
        }
    }

    /// Canonical XML form sent to WSAA, inside the CMS envelope.
    pub fn to_xml(&self) -> String {
        format!(
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
                "<loginTicketRequest version=\"1.0\">",
                "<header>",
                "<uniqueId>{}</uniqueId>",
                "<generationTime>{}</generationTime>",
                "<expirationTime>{}</expirationTime>",
                "</header>",
                "<service>{}</service>",
                "</loginTicketRequest>"
            ),
            self.unique_id,
            format_timestamp(self.generated_at),
            format_timestamp(self.expires_at),
            escape(self.service.as_str()),
        )
    }
}

// RFC 3339 in whole seconds with the caller's offset, e.g. 2026-10-16T09:50:00-03:00.
fn format_timestamp(t: OffsetDateTime) -> String {
    let t = t.replace_nanosecond(0).unwrap_or(t);
    t.format(&Rfc3339)
        .unwrap_or_else(|_| t.unix_timestamp().to_string())
}
