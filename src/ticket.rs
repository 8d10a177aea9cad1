use time::{Duration, OffsetDateTime};

use crate::sensitive::Sensitive;

/// Access ticket granted by WSAA. Immutable; a refresh replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityTicket {
    pub token: Sensitive,
    pub sign: Sensitive,
    pub expires_at: OffsetDateTime,
}

impl SecurityTicket {
    pub fn new(token: impl Into<String>, sign: impl Into<String>, expires_at: OffsetDateTime) -> Self {
        Self {
            token: Sensitive::new(token),
            sign: Sensitive::new(sign),
            expires_at,
        }
    }

    /// Usable at `now`, keeping `margin` in reserve against clock skew.
    pub fn is_fresh(&self, now: OffsetDateTime, margin: Duration) -> bool {
        now < self.expires_at - margin
    }
}
