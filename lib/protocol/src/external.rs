//! Notifications sent from the web app to the extension.
//!
//! The web app completes sign-in on its own origin and then tells the
//! extension about it, so the extension's cached identity converges on the
//! web session without running the interactive flow itself.

use crate::error::RelayError;
use async_trait::async_trait;
use identity_relay_core::Profile;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message from the web app to the extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalMessage {
    /// The user signed in on the web app.
    LoginSuccess {
        /// The signed-in user.
        user: Profile,
    },
    /// The user signed out on the web app.
    LogoutSuccess,
}

impl ExternalMessage {
    /// Parses an external message.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::UnknownMessageType` for an unrecognized `type`
    /// and `RelayError::MalformedMessage` for any other shape problem,
    /// including `LOGIN_SUCCESS` without a `user`.
    pub fn parse(value: &Value) -> Result<Self, RelayError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::malformed("missing `type`"))?;
        if !matches!(kind, "LOGIN_SUCCESS" | "LOGOUT_SUCCESS") {
            return Err(RelayError::UnknownMessageType {
                kind: kind.to_string(),
            });
        }
        serde_json::from_value(value.clone()).map_err(|e| RelayError::malformed(e.to_string()))
    }

    /// Returns the wire tag.
    #[must_use]
    pub fn wire_tag(&self) -> &'static str {
        match self {
            Self::LoginSuccess { .. } => "LOGIN_SUCCESS",
            Self::LogoutSuccess => "LOGOUT_SUCCESS",
        }
    }
}

/// Acknowledgement returned to the web app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAck {
    /// Whether the notification was applied.
    pub success: bool,
}

impl ExternalAck {
    /// A successful acknowledgement.
    #[must_use]
    pub const fn ok() -> Self {
        Self { success: true }
    }
}

/// Delivers external messages to an extension by id.
///
/// Implemented by whatever carries messages from a web page to an
/// installed extension; the web app only sees this trait.
#[async_trait]
pub trait ExternalMessenger: Send + Sync {
    /// Sends a message to the extension with the given id.
    async fn send_external(
        &self,
        extension_id: &str,
        message: &ExternalMessage,
    ) -> Result<ExternalAck, RelayError>;
}
