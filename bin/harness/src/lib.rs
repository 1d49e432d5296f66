//! In-process harness for identity-relay.
//!
//! Wires the popup, extension controller, offscreen host, relay page and web
//! app together over in-memory channels, backed by the in-memory identity
//! provider and a JSON file store, and drives them through a full
//! login/logout round trip.

pub mod config;
pub mod error;
pub mod harness;
