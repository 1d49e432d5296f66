//! Harness configuration.
//!
//! Composed from the library configs and loaded via the `config` crate from
//! `IDENTITY_RELAY_*` environment variables, with `__` separating nested
//! keys (e.g. `IDENTITY_RELAY_EXTENSION__EXTENSION_ID`).

use identity_relay_extension::ExtensionConfig;
use identity_relay_page::RelayPageConfig;
use serde::Deserialize;
use std::path::PathBuf;

/// Prefix of every environment variable the harness reads.
pub const ENV_PREFIX: &str = "IDENTITY_RELAY";

/// Harness configuration composed from library configs.
#[derive(Debug, Clone, Deserialize)]
pub struct HarnessConfig {
    /// Extension configuration.
    pub extension: ExtensionConfig,

    /// Relay page configuration.
    #[serde(default)]
    pub relay_page: RelayPageConfig,

    /// File backing the extension's persistent storage.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("identity-relay-storage.json")
}

impl HarnessConfig {
    /// Creates a config with default relay page settings and storage path.
    #[must_use]
    pub fn new(extension: ExtensionConfig) -> Self {
        Self {
            extension,
            relay_page: RelayPageConfig::default(),
            storage_path: default_storage_path(),
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::load(environment())
    }

    fn load(source: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }

    /// Returns the relay page config, trusting the extension's documents
    /// when no ancestor origin is configured.
    #[must_use]
    pub fn relay_page_config(&self) -> RelayPageConfig {
        match &self.relay_page.ancestor_origin {
            Some(origin) if !origin.is_empty() => self.relay_page.clone(),
            _ => RelayPageConfig::with_ancestor(self.extension.extension_origin()),
        }
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
