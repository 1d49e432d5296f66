//! Request and response messages exchanged inside the extension.
//!
//! Requests travel as `{ "type": "LOGIN_GOOGLE" | "GET_AUTH_STATE" | "LOGOUT" }`,
//! with `"target": "offscreen"` and a `"requestId"` added when the controller
//! forwards them to the offscreen document. Every request gets exactly one
//! response in one of three shapes:
//!
//! ```text
//! { "profile": { ... } }              authenticated
//! { "profile": null }                 not authenticated / signed out
//! { "error": { "code", "message" } }  failure
//! ```

use crate::error::{ErrorBody, RelayError};
use identity_relay_core::{Profile, RequestId};
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};
use std::fmt;
use tracing::error;

/// The closed set of relay requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayRequest {
    /// Run the provider's interactive sign-in through the relay chain.
    StartInteractiveAuth,
    /// Report the cached identity.
    QueryState,
    /// Forget the cached identity.
    SignOut,
}

impl RelayRequest {
    /// Every request kind.
    pub const ALL: [Self; 3] = [Self::StartInteractiveAuth, Self::QueryState, Self::SignOut];

    /// Returns the wire tag for this request.
    #[must_use]
    pub const fn wire_tag(self) -> &'static str {
        match self {
            Self::StartInteractiveAuth => "LOGIN_GOOGLE",
            Self::QueryState => "GET_AUTH_STATE",
            Self::SignOut => "LOGOUT",
        }
    }

    /// Looks up a request by its wire tag.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::UnknownMessageType` for any other tag.
    pub fn from_wire_tag(tag: &str) -> Result<Self, RelayError> {
        Self::ALL
            .into_iter()
            .find(|request| request.wire_tag() == tag)
            .ok_or_else(|| RelayError::UnknownMessageType {
                kind: tag.to_string(),
            })
    }
}

impl Serialize for RelayRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.wire_tag())
    }
}

impl<'de> Deserialize<'de> for RelayRequest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Self::from_wire_tag(&tag).map_err(D::Error::custom)
    }
}

impl fmt::Display for RelayRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_tag())
    }
}

/// Addressing tag for messages meant for a specific extension context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// The offscreen document.
    Offscreen,
}

/// A request as it travels on the extension's internal message bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionMessage {
    /// The request kind, serialized as `type`.
    #[serde(rename = "type")]
    pub request: RelayRequest,
    /// Which context should handle it; `None` means the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    /// Correlation id, present on forwarded requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExtensionMessage {
    #[serde(rename = "type")]
    kind: Option<Value>,
    target: Option<Value>,
    request_id: Option<Value>,
}

impl ExtensionMessage {
    /// A request addressed to the controller.
    #[must_use]
    pub fn to_controller(request: RelayRequest) -> Self {
        Self {
            request,
            target: None,
            request_id: None,
        }
    }

    /// A request forwarded to the offscreen document.
    #[must_use]
    pub fn to_offscreen(request: RelayRequest, request_id: RequestId) -> Self {
        Self {
            request,
            target: Some(Target::Offscreen),
            request_id: Some(request_id),
        }
    }

    /// Returns true if the message is addressed to the offscreen document.
    #[must_use]
    pub fn is_for_offscreen(&self) -> bool {
        self.target == Some(Target::Offscreen)
    }

    /// Parses a message received on the extension bus.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::MalformedMessage` if the value is not an object,
    /// has no string `type`, or carries an invalid `target`/`requestId`, and
    /// `RelayError::UnknownMessageType` if the `type` is not a relay request.
    pub fn parse(value: &Value) -> Result<Self, RelayError> {
        if !value.is_object() {
            return Err(RelayError::malformed("message is not an object"));
        }
        let raw: RawExtensionMessage = serde_json::from_value(value.clone())
            .map_err(|e| RelayError::malformed(e.to_string()))?;

        let kind = match raw.kind {
            Some(Value::String(kind)) => kind,
            Some(_) => return Err(RelayError::malformed("`type` is not a string")),
            None => return Err(RelayError::malformed("missing `type`")),
        };
        let request = RelayRequest::from_wire_tag(&kind)?;

        let target = match raw.target {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value::<Target>(value)
                    .map_err(|_| RelayError::malformed("unknown `target`"))?,
            ),
        };

        let request_id = match raw.request_id {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(
                id.parse::<RequestId>()
                    .map_err(|e| RelayError::malformed(e.to_string()))?,
            ),
            Some(_) => return Err(RelayError::malformed("`requestId` is not a string")),
        };

        Ok(Self {
            request,
            target,
            request_id,
        })
    }
}

/// The single reply to a [`RelayRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayResponse {
    /// A user is signed in.
    Authenticated(Profile),
    /// No user is signed in, or sign-out was acknowledged.
    SignedOut,
    /// The request failed.
    Failed(ErrorBody),
}

impl RelayResponse {
    /// Builds a response from an optional profile.
    #[must_use]
    pub fn from_profile(profile: Option<Profile>) -> Self {
        match profile {
            Some(profile) => Self::Authenticated(profile),
            None => Self::SignedOut,
        }
    }

    /// Builds an error response.
    #[must_use]
    pub fn failed(error: impl Into<ErrorBody>) -> Self {
        Self::Failed(error.into())
    }

    /// Returns the profile, if authenticated.
    #[must_use]
    pub fn profile(&self) -> Option<&Profile> {
        match self {
            Self::Authenticated(profile) => Some(profile),
            _ => None,
        }
    }

    /// Returns the error, if failed.
    #[must_use]
    pub fn error(&self) -> Option<&ErrorBody> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Returns true if this is an error response.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Serializes to the wire form.
    ///
    /// If serialization fails the result is an error response, never the
    /// signed-out shape.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            error!(error = %e, "failed to serialize relay response");
            let body = ErrorBody::from(RelayError::malformed(e.to_string()));
            json!({ "error": { "code": body.code, "message": body.message } })
        })
    }

    /// Parses the wire form.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::MalformedMessage` unless the value is an object
    /// with exactly one key, `profile` or `error`, holding a valid payload.
    pub fn from_value(value: &Value) -> Result<Self, RelayError> {
        match value {
            Value::Object(map) => Self::from_map(map),
            _ => Err(RelayError::malformed("response is not an object")),
        }
    }

    fn from_map(map: &Map<String, Value>) -> Result<Self, RelayError> {
        if map.len() != 1 {
            return Err(RelayError::malformed(
                "response must carry exactly one of `profile` or `error`",
            ));
        }
        if let Some(profile) = map.get("profile") {
            if profile.is_null() {
                return Ok(Self::SignedOut);
            }
            let profile: Profile = serde_json::from_value(profile.clone())
                .map_err(|e| RelayError::malformed(format!("invalid profile: {e}")))?;
            return Ok(Self::Authenticated(profile));
        }
        if let Some(error) = map.get("error") {
            let error: ErrorBody = serde_json::from_value(error.clone())
                .map_err(|e| RelayError::malformed(format!("invalid error body: {e}")))?;
            return Ok(Self::Failed(error));
        }
        Err(RelayError::malformed(
            "response must carry `profile` or `error`",
        ))
    }
}

impl Serialize for RelayResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Self::Authenticated(profile) => map.serialize_entry("profile", profile)?,
            Self::SignedOut => map.serialize_entry("profile", &Option::<Profile>::None)?,
            Self::Failed(error) => map.serialize_entry("error", error)?,
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RelayResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Self::from_map(&map).map_err(D::Error::custom)
    }
}

impl From<Option<Profile>> for RelayResponse {
    fn from(profile: Option<Profile>) -> Self {
        Self::from_profile(profile)
    }
}
