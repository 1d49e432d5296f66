//! Harness errors.
//!
//! Each failed step of the round trip becomes a `HarnessError` wrapped in a
//! rootcause `Report`.

use std::fmt;

#[derive(Debug)]
pub enum HarnessError {
    /// The configuration could not be used.
    InvalidConfig { reason: String },
    /// A relay request came back as an error.
    AuthFailed { code: String, message: String },
    /// A web app flow failed.
    WebFlow { step: &'static str, message: String },
    /// A step finished in an unexpected state.
    Unexpected { step: &'static str, detail: String },
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { reason } => write!(f, "invalid configuration: {reason}"),
            Self::AuthFailed { code, message } => {
                write!(f, "authentication failed: {message} ({code})")
            }
            Self::WebFlow { step, message } => write!(f, "web app {step} failed: {message}"),
            Self::Unexpected { step, detail } => write!(f, "unexpected result at {step}: {detail}"),
        }
    }
}

impl std::error::Error for HarnessError {}
