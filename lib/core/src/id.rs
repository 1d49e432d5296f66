//! Strongly-typed identifiers.
//!
//! Ids use ULID format, so they are unique across contexts without any
//! coordination and sort by creation time in logs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to generate a strongly-typed ID wrapper around ULID.
///
/// The serialized form is the prefixed display string so ids stay readable
/// when they travel inside JSON messages.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Ulid);

        impl $name {
            /// Creates a new ID with a randomly generated ULID.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Creates an ID from a ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Returns the prefix used for display formatting.
            #[must_use]
            pub const fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let prefix_with_underscore = concat!($prefix, "_");
                let ulid_str = s.strip_prefix(prefix_with_underscore).unwrap_or(s);

                Ulid::from_str(ulid_str)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        reason: e.to_string(),
                    })
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }

        impl From<Ulid> for $name {
            fn from(ulid: Ulid) -> Self {
                Self(ulid)
            }
        }
    };
}

define_id!(
    /// Correlates one relayed request with its single reply.
    RequestId,
    "req"
);
