//! How the web app was opened.
//!
//! The extension's popup opens the web app with
//! `?source=extension&extensionId=<id>`; anything else is a direct visit.

use url::Url;

/// Query value of `source` that marks an extension-opened tab.
pub const EXTENSION_SOURCE: &str = "extension";

/// The context the web app was entered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryContext {
    /// Opened directly by the user.
    Direct,
    /// Opened by the extension with the given id.
    Extension { extension_id: String },
}

impl EntryContext {
    /// Reads the entry context from the page URL.
    ///
    /// Unparseable URLs, a missing or empty `extensionId`, and any other
    /// `source` are all treated as a direct visit.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        let Ok(url) = Url::parse(url) else {
            return Self::Direct;
        };
        let mut source = None;
        let mut extension_id = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "source" => source = Some(value.into_owned()),
                "extensionId" => extension_id = Some(value.into_owned()),
                _ => {}
            }
        }
        match (source.as_deref(), extension_id) {
            (Some(EXTENSION_SOURCE), Some(extension_id)) if !extension_id.is_empty() => {
                Self::Extension { extension_id }
            }
            _ => Self::Direct,
        }
    }

    /// Returns the extension id, if opened by the extension.
    #[must_use]
    pub fn extension_id(&self) -> Option<&str> {
        match self {
            Self::Extension { extension_id } => Some(extension_id),
            Self::Direct => None,
        }
    }

    #[must_use]
    pub fn is_from_extension(&self) -> bool {
        matches!(self, Self::Extension { .. })
    }
}
