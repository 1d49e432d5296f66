//! Relay page configuration.

use identity_relay_protocol::WILDCARD_ORIGIN;
use serde::Deserialize;

/// Configuration for the relay page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RelayPageConfig {
    /// Origin of the embedding document, as reported by the browser's
    /// ancestor origin list.
    ///
    /// When unknown, `initAuth` is accepted from any origin and replies are
    /// posted with target `"*"`.
    #[serde(default)]
    pub ancestor_origin: Option<String>,
}

impl RelayPageConfig {
    /// Creates a config that trusts only the given parent origin.
    #[must_use]
    pub fn with_ancestor(origin: impl Into<String>) -> Self {
        Self {
            ancestor_origin: Some(origin.into()),
        }
    }

    /// Returns the target origin for replies.
    #[must_use]
    pub fn reply_target(&self) -> &str {
        self.ancestor_origin
            .as_deref()
            .filter(|origin| !origin.is_empty())
            .unwrap_or(WILDCARD_ORIGIN)
    }

    /// Returns true if a message from `origin` may start sign-in.
    #[must_use]
    pub fn accepts(&self, origin: &str) -> bool {
        match self.reply_target() {
            WILDCARD_ORIGIN => true,
            expected => expected == origin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_ancestor_falls_back_to_wildcard() {
        let config = RelayPageConfig::default();
        assert_eq!(config.reply_target(), "*");
        assert!(config.accepts("https://anything.example.com"));

        let empty = RelayPageConfig {
            ancestor_origin: Some(String::new()),
        };
        assert_eq!(empty.reply_target(), "*");
    }

    #[test]
    fn known_ancestor_is_enforced() {
        let config = RelayPageConfig::with_ancestor("chrome-extension://abc");
        assert_eq!(config.reply_target(), "chrome-extension://abc");
        assert!(config.accepts("chrome-extension://abc"));
        assert!(!config.accepts("https://evil.example.com"));
    }
}
