//! Sign-in form validation and error messages.

use identity_relay_provider::memory::MIN_PASSWORD_LEN;
use identity_relay_provider::{AuthError, AuthFlow};
use std::fmt;

/// An error shown on a sign-in form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormError {
    /// Machine-readable code: `form/*` for local validation, the provider's
    /// code otherwise.
    pub code: String,
    /// Message shown to the user.
    pub message: String,
}

impl FormError {
    pub const EMAIL_REQUIRED: &'static str = "form/email-required";
    pub const PASSWORD_REQUIRED: &'static str = "form/password-required";
    pub const PASSWORD_TOO_SHORT: &'static str = "form/password-too-short";
    pub const PASSWORD_MISMATCH: &'static str = "form/password-mismatch";
    pub const DISPLAY_NAME_REQUIRED: &'static str = "form/display-name-required";

    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Maps a provider failure to the message for `flow`.
    #[must_use]
    pub fn from_auth(error: &AuthError, flow: AuthFlow) -> Self {
        Self::new(error.code.clone(), error.user_message(flow))
    }
}

impl fmt::Display for FormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FormError {}

/// The email sign-up form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignupForm {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub display_name: String,
}

impl SignupForm {
    /// Checks the form before it is submitted to the provider.
    ///
    /// Rules are checked in order and the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns a `form/*` [`FormError`] naming the first rule that failed.
    pub fn validate(&self) -> Result<(), FormError> {
        if self.email.trim().is_empty() {
            return Err(FormError::new(
                FormError::EMAIL_REQUIRED,
                "Please enter your email.",
            ));
        }
        if self.password.trim().is_empty() {
            return Err(FormError::new(
                FormError::PASSWORD_REQUIRED,
                "Please enter a password.",
            ));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(FormError::new(
                FormError::PASSWORD_TOO_SHORT,
                format!("The password must be at least {MIN_PASSWORD_LEN} characters."),
            ));
        }
        if self.password != self.confirm_password {
            return Err(FormError::new(
                FormError::PASSWORD_MISMATCH,
                "The passwords do not match.",
            ));
        }
        if self.display_name.trim().is_empty() {
            return Err(FormError::new(
                FormError::DISPLAY_NAME_REQUIRED,
                "Please enter your name.",
            ));
        }
        Ok(())
    }

    /// Returns true once the confirmation has been typed and differs.
    #[must_use]
    pub fn confirmation_mismatch(&self) -> bool {
        !self.confirm_password.is_empty() && self.password != self.confirm_password
    }
}

/// Strength hint shown under the password field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PasswordStrength {
    Weak,
    Medium,
    Strong,
}

impl PasswordStrength {
    /// Rates a password; `None` while the field is empty.
    ///
    /// Strong requires at least eight characters with a lowercase letter, an
    /// uppercase letter and a digit.
    #[must_use]
    pub fn of(password: &str) -> Option<Self> {
        let len = password.chars().count();
        if len == 0 {
            return None;
        }
        if len < MIN_PASSWORD_LEN {
            return Some(Self::Weak);
        }
        let mixed = password.chars().any(|c| c.is_ascii_lowercase())
            && password.chars().any(|c| c.is_ascii_uppercase())
            && password.chars().any(|c| c.is_ascii_digit());
        if len < 8 || !mixed {
            return Some(Self::Medium);
        }
        Some(Self::Strong)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weak => "weak",
            Self::Medium => "medium",
            Self::Strong => "strong",
        }
    }
}
