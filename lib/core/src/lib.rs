//! Core domain types and utilities for identity-relay.
//!
//! This crate provides the identity shapes that cross every isolation
//! boundary of the relay (`Profile`), the provider-side credential object
//! they are derived from (`ProviderUser`), request correlation ids, and the
//! shared error handling foundation.

pub mod error;
pub mod id;
pub mod profile;

pub use error::Result;
pub use id::{ParseIdError, RequestId};
pub use profile::{Profile, ProviderUser};
