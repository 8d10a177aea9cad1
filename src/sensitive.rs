use std::fmt;

use zeroize::Zeroizing;

/// Number of leading characters a [`Sensitive`] value shows when formatted.
pub const VISIBLE_PREFIX: usize = 8;

/// A secret string (ticket token, ticket sign) that never formats in full.
///
/// `Debug` and `Display` render at most [`VISIBLE_PREFIX`] characters followed
/// by an ellipsis. The buffer is zeroized on drop. Use [`Sensitive::expose`]
/// only where the full value is sent over the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct Sensitive(Zeroizing<String>);

impl Sensitive {
    pub fn new(value: impl Into<String>) -> Self {
        Sensitive(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// The diagnostic prefix shown by the formatters.
    pub fn prefix(&self) -> &str {
        match self.0.char_indices().nth(VISIBLE_PREFIX) {
            Some((idx, _)) => &self.0[..idx],
            None => self.0.as_str(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Sensitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}…", self.prefix())
    }
}

impl fmt::Debug for Sensitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sensitive({:?}…)", self.prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatting_shows_prefix_only() {
        let token = Sensitive::new("PD94bWwgdmVyc2lvbj0iMS4wIiBlbmNvZGluZz0iVVRGLTgi");
        assert_eq!(token.to_string(), "PD94bWwg…");
        assert_eq!(format!("{token:?}"), "Sensitive(\"PD94bWwg\"…)");
        assert!(token.expose().starts_with("PD94bWwgdmVy"));
    }

    #[test]
    fn short_values_are_not_padded() {
        let sign = Sensitive::new("abc");
        assert_eq!(sign.prefix(), "abc");
        assert!(!sign.is_empty());
    }
}
