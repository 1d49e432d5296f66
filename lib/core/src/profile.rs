//! The identity shapes exchanged by the relay.
//!
//! `ProviderUser` is what the identity provider hands back after a
//! successful sign-in, tokens included. `Profile` is the reduced form that is
//! allowed to leave the provider's context: it is the only identity value
//! ever posted across a frame, sent between extension contexts, or written to
//! storage.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The minimal, credential-free view of an authenticated user.
///
/// Serialized as `{ "id", "email", "displayName", "photoUrl" }`. All four keys
/// are always present; absent values serialize as `null`. The provider-native
/// spellings `uid` and `photoURL` are accepted on input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Opaque stable identifier assigned by the provider.
    #[serde(alias = "uid")]
    pub id: String,
    /// Email address, if the provider shared one.
    #[serde(default)]
    pub email: Option<String>,
    /// Display name, if set.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Avatar URL, if set.
    #[serde(default, alias = "photoURL")]
    pub photo_url: Option<String>,
}

impl Profile {
    /// Creates a profile with only the identifier set.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            display_name: None,
            photo_url: None,
        }
    }

    /// Sets the email.
    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, display_name: Option<String>) -> Self {
        self.display_name = display_name;
        self
    }

    /// Sets the photo URL.
    #[must_use]
    pub fn with_photo_url(mut self, photo_url: Option<String>) -> Self {
        self.photo_url = photo_url;
        self
    }

    /// Returns the best human-readable label: display name, then email, then id.
    #[must_use]
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or(self.email.as_deref().filter(|email| !email.is_empty()))
            .unwrap_or(&self.id)
    }
}

impl From<&ProviderUser> for Profile {
    fn from(user: &ProviderUser) -> Self {
        Self {
            id: user.uid.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            photo_url: user.photo_url.clone(),
        }
    }
}

impl From<ProviderUser> for Profile {
    fn from(user: ProviderUser) -> Self {
        Self {
            id: user.uid,
            email: user.email,
            display_name: user.display_name,
            photo_url: user.photo_url,
        }
    }
}

/// The full user object returned by the identity provider.
///
/// Carries session material (`id_token`, `refresh_token`) that must never be
/// serialized across a context boundary, so this type deliberately does not
/// implement `Serialize`. Convert to [`Profile`] first.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ProviderUser {
    /// Provider-assigned user id.
    pub uid: String,
    /// Email address.
    pub email: Option<String>,
    /// Display name.
    pub display_name: Option<String>,
    /// Avatar URL.
    pub photo_url: Option<String>,
    /// Whether the provider verified the email address.
    pub email_verified: bool,
    /// Sign-in method that produced this user (e.g. `google.com`, `password`).
    pub provider_id: String,
    /// Short-lived ID token.
    pub id_token: Option<String>,
    /// Long-lived refresh token.
    pub refresh_token: Option<String>,
}

impl ProviderUser {
    /// Creates a provider user with the given uid and sign-in method.
    #[must_use]
    pub fn new(uid: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            provider_id: provider_id.into(),
            ..Self::default()
        }
    }

    /// Returns the credential-free profile for this user.
    #[must_use]
    pub fn profile(&self) -> Profile {
        Profile::from(self)
    }
}

impl fmt::Debug for ProviderUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderUser")
            .field("uid", &self.uid)
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .field("photo_url", &self.photo_url)
            .field("email_verified", &self.email_verified)
            .field("provider_id", &self.provider_id)
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
