//! Extension configuration.

use serde::{Deserialize, Deserializer};
use std::time::Duration;
use url::Url;

/// Configuration shared by the extension's contexts.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtensionConfig {
    /// The extension's own id, as assigned by the browser.
    pub extension_id: String,

    /// Web app entry URL that the popup opens for sign-in.
    pub spa_url: String,

    /// URL of the relay page embedded by the offscreen document.
    pub relay_page_url: String,

    /// Origins allowed to send external notifications.
    ///
    /// Accepts a list or a comma-separated string.
    #[serde(default, deserialize_with = "deserialize_origins")]
    pub allowed_external_origins: Vec<String>,

    /// How long the offscreen document waits for the relay page to answer
    /// an interactive sign-in, in seconds.
    #[serde(default = "default_auth_timeout_seconds")]
    pub auth_timeout_seconds: u64,

    /// Storage key holding the cached profile.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

fn default_auth_timeout_seconds() -> u64 {
    120
}

fn default_storage_key() -> String {
    crate::storage::DEFAULT_PROFILE_KEY.to_string()
}

impl ExtensionConfig {
    /// Creates a config with default timeout and storage key.
    #[must_use]
    pub fn new(
        extension_id: impl Into<String>,
        spa_url: impl Into<String>,
        relay_page_url: impl Into<String>,
    ) -> Self {
        Self {
            extension_id: extension_id.into(),
            spa_url: spa_url.into(),
            relay_page_url: relay_page_url.into(),
            allowed_external_origins: Vec::new(),
            auth_timeout_seconds: default_auth_timeout_seconds(),
            storage_key: default_storage_key(),
        }
    }

    /// Adds an origin allowed to send external notifications.
    #[must_use]
    pub fn allow_external_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_external_origins.push(origin.into());
        self
    }

    /// Returns the interactive sign-in timeout.
    #[must_use]
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_seconds)
    }

    /// Returns the origin of the extension's own documents.
    #[must_use]
    pub fn extension_origin(&self) -> String {
        format!("chrome-extension://{}", self.extension_id)
    }

    /// Returns the origin of the relay page.
    ///
    /// # Errors
    ///
    /// Returns an error if `relay_page_url` is not a valid URL.
    pub fn relay_page_origin(&self) -> Result<String, url::ParseError> {
        Ok(Url::parse(&self.relay_page_url)?
            .origin()
            .ascii_serialization())
    }

    /// Returns the web app URL that signals an extension-initiated login:
    /// `<spa_url>?source=extension&extensionId=<id>`.
    ///
    /// # Errors
    ///
    /// Returns an error if `spa_url` is not a valid URL.
    pub fn login_url(&self) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.spa_url)?;
        url.query_pairs_mut()
            .append_pair("source", "extension")
            .append_pair("extensionId", &self.extension_id);
        Ok(url)
    }

    /// Returns true if `origin` may send external notifications.
    #[must_use]
    pub fn allows_external(&self, origin: &str) -> bool {
        let origin = origin.trim_end_matches('/');
        self.allowed_external_origins
            .iter()
            .any(|allowed| allowed.trim_end_matches('/') == origin)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OriginList {
    Joined(String),
    List(Vec<String>),
}

fn deserialize_origins<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let origins = match OriginList::deserialize(deserializer)? {
        OriginList::Joined(joined) => joined.split(',').map(str::to_string).collect(),
        OriginList::List(list) => list,
    };
    Ok(origins
        .into_iter()
        .map(|origin| origin.trim().to_string())
        .filter(|origin| !origin.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> ExtensionConfig {
        ExtensionConfig::new(
            "abcdef",
            "https://app.example.com",
            "https://signin.example.com/relay.html",
        )
    }

    #[test]
    fn defaults() {
        let config = config();
        assert_eq!(config.auth_timeout(), Duration::from_secs(120));
        assert_eq!(config.storage_key, "currentUser");
        assert_eq!(config.extension_origin(), "chrome-extension://abcdef");
        assert!(config.allowed_external_origins.is_empty());
    }

    #[test]
    fn derives_relay_origin_and_login_url() {
        let config = config();
        assert_eq!(
            config.relay_page_origin().expect("origin"),
            "https://signin.example.com"
        );
        assert_eq!(
            config.login_url().expect("url").as_str(),
            "https://app.example.com/?source=extension&extensionId=abcdef"
        );
    }

    #[test]
    fn deserializes_comma_separated_origins() {
        let config: ExtensionConfig = serde_json::from_value(json!({
            "extension_id": "abcdef",
            "spa_url": "https://app.example.com",
            "relay_page_url": "https://signin.example.com",
            "allowed_external_origins": "https://app.example.com, https://staging.example.com,",
            "auth_timeout_seconds": 5,
        }))
        .expect("deserialize");
        assert_eq!(
            config.allowed_external_origins,
            vec!["https://app.example.com", "https://staging.example.com"]
        );
        assert_eq!(config.auth_timeout(), Duration::from_secs(5));
        assert!(config.allows_external("https://staging.example.com/"));
        assert!(!config.allows_external("https://evil.example.com"));
    }

    #[test]
    fn deserializes_origin_list() {
        let config: ExtensionConfig = serde_json::from_value(json!({
            "extension_id": "abcdef",
            "spa_url": "https://app.example.com",
            "relay_page_url": "https://signin.example.com",
            "allowed_external_origins": ["https://app.example.com"],
        }))
        .expect("deserialize");
        assert!(config.allows_external("https://app.example.com"));
    }
}
