//! Provider error types.
//!
//! The provider reports failures as `{ name, code, message }` triples with
//! stable `auth/*` codes. [`AuthErrorCode`] names the codes the relay
//! understands and maps each to a message suitable for showing to a user.

use identity_relay_protocol::ErrorBody;
use std::fmt;

/// Which user-facing flow an error surfaced in.
///
/// The same code reads differently depending on what the user was doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlow {
    /// Email/password sign-in (also used for credential reset).
    SignIn,
    /// Email/password account creation.
    SignUp,
    /// The provider's interactive popup flow.
    Interactive,
}

/// Provider error codes known to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthErrorCode {
    UserNotFound,
    WrongPassword,
    InvalidEmail,
    UserDisabled,
    TooManyRequests,
    EmailAlreadyInUse,
    OperationNotAllowed,
    WeakPassword,
    PopupBlocked,
    PopupClosedByUser,
    CancelledPopupRequest,
    NetworkRequestFailed,
    InternalError,
    /// Any code not listed above.
    Other(String),
}

impl AuthErrorCode {
    /// Looks up a code by its wire string.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "auth/user-not-found" => Self::UserNotFound,
            "auth/wrong-password" => Self::WrongPassword,
            "auth/invalid-email" => Self::InvalidEmail,
            "auth/user-disabled" => Self::UserDisabled,
            "auth/too-many-requests" => Self::TooManyRequests,
            "auth/email-already-in-use" => Self::EmailAlreadyInUse,
            "auth/operation-not-allowed" => Self::OperationNotAllowed,
            "auth/weak-password" => Self::WeakPassword,
            "auth/popup-blocked" => Self::PopupBlocked,
            "auth/popup-closed-by-user" => Self::PopupClosedByUser,
            "auth/cancelled-popup-request" => Self::CancelledPopupRequest,
            "auth/network-request-failed" => Self::NetworkRequestFailed,
            "auth/internal-error" => Self::InternalError,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the wire string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::UserNotFound => "auth/user-not-found",
            Self::WrongPassword => "auth/wrong-password",
            Self::InvalidEmail => "auth/invalid-email",
            Self::UserDisabled => "auth/user-disabled",
            Self::TooManyRequests => "auth/too-many-requests",
            Self::EmailAlreadyInUse => "auth/email-already-in-use",
            Self::OperationNotAllowed => "auth/operation-not-allowed",
            Self::WeakPassword => "auth/weak-password",
            Self::PopupBlocked => "auth/popup-blocked",
            Self::PopupClosedByUser => "auth/popup-closed-by-user",
            Self::CancelledPopupRequest => "auth/cancelled-popup-request",
            Self::NetworkRequestFailed => "auth/network-request-failed",
            Self::InternalError => "auth/internal-error",
            Self::Other(code) => code,
        }
    }

    /// Returns the message shown to a user for this code in the given flow.
    ///
    /// Codes that mean nothing in a flow fall back to that flow's generic
    /// message.
    #[must_use]
    pub fn user_message(&self, flow: AuthFlow) -> &'static str {
        match (flow, self) {
            (AuthFlow::SignIn, Self::UserNotFound) => "This email is not registered.",
            (AuthFlow::SignIn, Self::WrongPassword) => "Incorrect password.",
            (AuthFlow::SignIn | AuthFlow::SignUp, Self::InvalidEmail) => {
                "The email address is not valid."
            }
            (AuthFlow::SignIn, Self::UserDisabled) => "This account has been disabled.",
            (AuthFlow::SignIn, Self::TooManyRequests) => {
                "Too many attempts. Access is temporarily blocked."
            }
            (AuthFlow::SignIn, _) => "An error occurred while signing in.",

            (AuthFlow::SignUp, Self::EmailAlreadyInUse) => "This email is already in use.",
            (AuthFlow::SignUp, Self::OperationNotAllowed) => {
                "Email/password sign-up is disabled."
            }
            (AuthFlow::SignUp, Self::WeakPassword) => {
                "The password is too weak. Use a stronger password."
            }
            (AuthFlow::SignUp, _) => "An error occurred while signing up.",

            (AuthFlow::Interactive, Self::PopupBlocked) => {
                "The sign-in popup was blocked by the browser."
            }
            (AuthFlow::Interactive, Self::PopupClosedByUser) => {
                "The sign-in popup was closed before sign-in finished."
            }
            (AuthFlow::Interactive, Self::CancelledPopupRequest) => {
                "Another sign-in popup is already open."
            }
            (AuthFlow::Interactive, Self::NetworkRequestFailed) => {
                "A network error interrupted sign-in."
            }
            (AuthFlow::Interactive, _) => "An error occurred while signing in.",
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthError {
    /// Error class name, e.g. `FirebaseError`.
    pub name: String,
    /// Stable `auth/*` code.
    pub code: String,
    /// Provider-supplied description.
    pub message: String,
}

impl AuthError {
    /// Class name used when the provider does not supply one.
    pub const DEFAULT_NAME: &'static str = "ProviderError";

    /// Creates an error with the default class name.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: Self::DEFAULT_NAME.to_string(),
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates an error from a known code.
    #[must_use]
    pub fn from_code(code: &AuthErrorCode, message: impl Into<String>) -> Self {
        Self::new(code.as_str(), message)
    }

    /// Sets the error class name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the parsed error code.
    #[must_use]
    pub fn kind(&self) -> AuthErrorCode {
        AuthErrorCode::from_code(&self.code)
    }

    /// Returns the user-facing message for this error in the given flow.
    #[must_use]
    pub fn user_message(&self, flow: AuthFlow) -> &'static str {
        self.kind().user_message(flow)
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.name, self.message, self.code)
    }
}

impl std::error::Error for AuthError {}

impl From<&AuthError> for ErrorBody {
    fn from(err: &AuthError) -> Self {
        Self::new(err.code.clone(), err.message.clone())
    }
}

impl From<AuthError> for ErrorBody {
    fn from(err: AuthError) -> Self {
        Self::new(err.code, err.message)
    }
}
