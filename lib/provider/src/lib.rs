//! Identity provider client for identity-relay.
//!
//! The relay never implements authentication itself; it drives a hosted
//! identity provider through the [`IdentityProvider`] trait:
//!
//! - **Interactive sign-in**: the provider's own popup flow
//! - **Email/password**: sign-in, sign-up and credential reset
//! - **Session observation**: a `watch` channel of the current user
//!
//! Provider failures are reported as [`AuthError`], whose codes map to
//! user-facing messages per form flow.

pub mod client;
pub mod error;
pub mod memory;

pub use client::IdentityProvider;
pub use error::{AuthError, AuthErrorCode, AuthFlow};
pub use memory::InMemoryProvider;
