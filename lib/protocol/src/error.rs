//! Error types for the relay protocol.
//!
//! A failure in one context cannot be observed as a failure in another, so
//! every error here knows how to turn itself into an [`ErrorBody`], the
//! `{ code, message }` object carried by an error response:
//! - `RelayError`: malformed or unroutable messages, lost replies
//! - `LifecycleError`: offscreen document creation and teardown failures
//! - `StorageUnavailableError`: the persistent store could not be used

use identity_relay_core::RequestId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The `{ code, message }` payload of an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `relay/timeout` or `auth/popup-blocked`.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl ErrorBody {
    /// Creates an error body.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Errors in moving messages between contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The message could not be parsed into any known shape.
    MalformedMessage { reason: String },
    /// The message parsed but named a type this endpoint does not handle.
    UnknownMessageType { kind: String },
    /// No reply arrived within the allowed time.
    Timeout {
        request_id: RequestId,
        waited_ms: u64,
    },
    /// The peer context went away before replying.
    ChannelClosed { channel: &'static str },
    /// An external message arrived from an origin that is not allow-listed.
    UntrustedSender { origin: String },
}

impl RelayError {
    /// Shorthand for a malformed-message error.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Returns the stable wire code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedMessage { .. } => "relay/malformed-message",
            Self::UnknownMessageType { .. } => "relay/unknown-message-type",
            Self::Timeout { .. } => "relay/timeout",
            Self::ChannelClosed { .. } => "relay/channel-closed",
            Self::UntrustedSender { .. } => "relay/untrusted-sender",
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedMessage { reason } => write!(f, "malformed message: {reason}"),
            Self::UnknownMessageType { kind } => write!(f, "unknown message type: {kind}"),
            Self::Timeout {
                request_id,
                waited_ms,
            } => write!(f, "no reply to {request_id} after {waited_ms}ms"),
            Self::ChannelClosed { channel } => write!(f, "{channel} channel closed"),
            Self::UntrustedSender { origin } => {
                write!(f, "sender origin '{origin}' is not allowed")
            }
        }
    }
}

impl std::error::Error for RelayError {}

impl From<&RelayError> for ErrorBody {
    fn from(err: &RelayError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl From<RelayError> for ErrorBody {
    fn from(err: RelayError) -> Self {
        Self::from(&err)
    }
}

/// Errors from offscreen document lifecycle operations.
///
/// `Clone` so a single creation outcome can be shared by every caller that
/// joined it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The platform refused or failed to create the document.
    CreateFailed { reason: String },
    /// The platform failed to close the document.
    CloseFailed { reason: String },
    /// The document was closed while a request was using it.
    DocumentClosed,
}

impl LifecycleError {
    /// Returns the stable wire code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::CreateFailed { .. } => "lifecycle/create-failed",
            Self::CloseFailed { .. } => "lifecycle/close-failed",
            Self::DocumentClosed => "lifecycle/closed",
        }
    }
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateFailed { reason } => {
                write!(f, "failed to create offscreen document: {reason}")
            }
            Self::CloseFailed { reason } => {
                write!(f, "failed to close offscreen document: {reason}")
            }
            Self::DocumentClosed => write!(f, "offscreen document is closed"),
        }
    }
}

impl std::error::Error for LifecycleError {}

impl From<&LifecycleError> for ErrorBody {
    fn from(err: &LifecycleError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl From<LifecycleError> for ErrorBody {
    fn from(err: LifecycleError) -> Self {
        Self::from(&err)
    }
}

/// The persistent key/value store cannot be used from this context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageUnavailableError {
    /// Why the store could not be used.
    pub reason: String,
}

impl StorageUnavailableError {
    /// The stable wire code for storage failures.
    pub const CODE: &'static str = "storage/unavailable";

    /// Creates a storage error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for StorageUnavailableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "storage unavailable: {}", self.reason)
    }
}

impl std::error::Error for StorageUnavailableError {}

impl From<&StorageUnavailableError> for ErrorBody {
    fn from(err: &StorageUnavailableError) -> Self {
        Self::new(StorageUnavailableError::CODE, err.to_string())
    }
}

impl From<StorageUnavailableError> for ErrorBody {
    fn from(err: StorageUnavailableError) -> Self {
        Self::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_error_timeout_display() {
        let request_id = RequestId::new();
        let err = RelayError::Timeout {
            request_id,
            waited_ms: 1500,
        };
        assert!(err.to_string().contains(&request_id.to_string()));
        assert!(err.to_string().contains("1500ms"));
        assert_eq!(err.code(), "relay/timeout");
    }

    #[test]
    fn relay_error_into_body() {
        let body = ErrorBody::from(RelayError::UnknownMessageType {
            kind: "PING".to_string(),
        });
        assert_eq!(body.code, "relay/unknown-message-type");
        assert!(body.message.contains("PING"));
    }

    #[test]
    fn lifecycle_error_into_body() {
        let body = ErrorBody::from(LifecycleError::CreateFailed {
            reason: "only one offscreen document allowed".to_string(),
        });
        assert_eq!(body.code, "lifecycle/create-failed");
        assert!(body.message.contains("only one offscreen document"));
    }

    #[test]
    fn storage_error_into_body() {
        let body = ErrorBody::from(StorageUnavailableError::new("quota exceeded"));
        assert_eq!(body.code, "storage/unavailable");
        assert!(body.message.contains("quota exceeded"));
    }

    #[test]
    fn error_body_wire_shape() {
        let body = ErrorBody::new("auth/popup-blocked", "popup blocked");
        let value = serde_json::to_value(&body).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({ "code": "auth/popup-blocked", "message": "popup blocked" })
        );
    }
}
