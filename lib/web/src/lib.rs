//! Web app side of identity-relay.
//!
//! The web app owns the user-facing sign-in experience on its own origin:
//!
//! - **Session**: [`WebSessionStore`] publishes the provider session as an
//!   [`AuthState`] and runs the sign-in flows
//! - **Forms**: client-side validation for email sign-up
//! - **Entry**: [`EntryContext`] recognizes tabs opened by the extension
//! - **Bridge**: [`ExtensionBridge`] reports sign-in and sign-out back to the
//!   extension that opened the tab

pub mod bridge;
pub mod entry;
pub mod form;
pub mod session;

pub use bridge::{BridgeOutcome, ExtensionBridge, TabCloser};
pub use entry::EntryContext;
pub use form::{FormError, PasswordStrength, SignupForm};
pub use session::{AuthState, WebSessionStore};
