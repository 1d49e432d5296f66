//! The relay page.
//!
//! A page served from the identity provider's authorized origin, embedded as
//! a hidden frame by the extension's offscreen document. It waits for an
//! `initAuth` signal from its parent, runs the provider's interactive
//! sign-in, and posts a credential-free result back. Failures are always
//! posted as data; nothing the provider does can make the page go silent.

pub mod config;
pub mod page;

pub use config::RelayPageConfig;
pub use page::{RelayPage, RelayState};
