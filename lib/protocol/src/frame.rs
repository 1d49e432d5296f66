//! Cross-document messaging between the offscreen document and the relay
//! page it embeds.
//!
//! A [`FramePort`] behaves like one side of `window.postMessage`: every
//! posted message names a target origin and is silently dropped unless that
//! origin is `"*"` or matches the receiving document, and every received
//! event carries the sender's origin so the receiver can check it.
//!
//! The relay page replies with JSON text. The same channel also carries
//! internal traffic of the provider library, recognizable by the
//! [`PROVIDER_NOISE_PREFIX`]; [`FrameReply::parse`] filters it out.

use crate::error::{ErrorBody, RelayError};
use crate::message::RelayResponse;
use identity_relay_core::{Profile, RequestId};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Prefix of provider-library internal messages sharing the frame channel.
pub const PROVIDER_NOISE_PREFIX: &str = "!_{";

/// Target origin that matches any receiver.
pub const WILDCARD_ORIGIN: &str = "*";

/// Payload of a cross-document message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameData {
    /// A string payload (the relay page posts JSON text).
    Text(String),
    /// A structured-clone payload.
    Json(Value),
}

impl FrameData {
    /// Decodes the payload into JSON, parsing text payloads.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::MalformedMessage` if a text payload is not JSON.
    pub fn to_json(&self) -> Result<Value, RelayError> {
        match self {
            Self::Json(value) => Ok(value.clone()),
            Self::Text(text) => serde_json::from_str(text)
                .map_err(|e| RelayError::malformed(format!("frame payload is not JSON: {e}"))),
        }
    }

    /// Returns true if this is provider-library noise.
    #[must_use]
    pub fn is_provider_noise(&self) -> bool {
        matches!(self, Self::Text(text) if text.starts_with(PROVIDER_NOISE_PREFIX))
    }
}

/// A delivered cross-document message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameEvent {
    /// Origin of the document that posted the message.
    pub origin: String,
    /// The payload.
    pub data: FrameData,
}

/// Creates a connected pair of frame ports.
///
/// The first port belongs to the embedding (parent) document, the second to
/// the embedded frame.
#[must_use]
pub fn frame_pair(
    parent_origin: impl Into<String>,
    child_origin: impl Into<String>,
) -> (FramePort, FramePort) {
    let parent_origin = parent_origin.into();
    let child_origin = child_origin.into();
    let (to_child, child_inbox) = mpsc::unbounded_channel();
    let (to_parent, parent_inbox) = mpsc::unbounded_channel();

    let parent = FramePort {
        sender: FrameSender {
            origin: parent_origin.clone(),
            peer_origin: child_origin.clone(),
            tx: to_child,
        },
        receiver: FrameReceiver { rx: parent_inbox },
    };
    let child = FramePort {
        sender: FrameSender {
            origin: child_origin,
            peer_origin: parent_origin,
            tx: to_parent,
        },
        receiver: FrameReceiver { rx: child_inbox },
    };
    (parent, child)
}

/// One document's end of a frame channel.
#[derive(Debug)]
pub struct FramePort {
    sender: FrameSender,
    receiver: FrameReceiver,
}

impl FramePort {
    /// Returns this document's origin.
    #[must_use]
    pub fn origin(&self) -> &str {
        self.sender.origin()
    }

    /// Returns the origin of the document on the other end.
    #[must_use]
    pub fn peer_origin(&self) -> &str {
        self.sender.peer_origin()
    }

    /// Posts a message to the other document.
    ///
    /// # Errors
    ///
    /// See [`FrameSender::post`].
    pub fn post(&self, data: FrameData, target_origin: &str) -> Result<bool, RelayError> {
        self.sender.post(data, target_origin)
    }

    /// Receives the next message, or `None` once the other side is gone.
    pub async fn recv(&mut self) -> Option<FrameEvent> {
        self.receiver.recv().await
    }

    /// Splits the port so sending and receiving can live in different places.
    #[must_use]
    pub fn split(self) -> (FrameSender, FrameReceiver) {
        (self.sender, self.receiver)
    }
}

/// Sending half of a [`FramePort`].
#[derive(Debug, Clone)]
pub struct FrameSender {
    origin: String,
    peer_origin: String,
    tx: mpsc::UnboundedSender<FrameEvent>,
}

impl FrameSender {
    /// Returns this document's origin.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns the origin of the document on the other end.
    #[must_use]
    pub fn peer_origin(&self) -> &str {
        &self.peer_origin
    }

    /// Posts a message to the other document.
    ///
    /// Returns `Ok(false)` without delivering when `target_origin` does not
    /// match the receiver, mirroring `postMessage`.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ChannelClosed` if the other document is gone.
    pub fn post(&self, data: FrameData, target_origin: &str) -> Result<bool, RelayError> {
        if target_origin != WILDCARD_ORIGIN && target_origin != self.peer_origin {
            debug!(
                target_origin,
                receiver = %self.peer_origin,
                "dropping frame message for mismatched target origin"
            );
            return Ok(false);
        }
        self.tx
            .send(FrameEvent {
                origin: self.origin.clone(),
                data,
            })
            .map_err(|_| RelayError::ChannelClosed { channel: "frame" })?;
        Ok(true)
    }
}

/// Receiving half of a [`FramePort`].
#[derive(Debug)]
pub struct FrameReceiver {
    rx: mpsc::UnboundedReceiver<FrameEvent>,
}

impl FrameReceiver {
    /// Receives the next message, or `None` once the other side is gone.
    pub async fn recv(&mut self) -> Option<FrameEvent> {
        self.rx.recv().await
    }
}

/// The parent's signal asking the relay page to start interactive sign-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitAuth {
    /// Correlation id to echo in the reply.
    pub request_id: Option<RequestId>,
}

impl InitAuth {
    /// Creates a signal for the given request.
    #[must_use]
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id: Some(request_id),
        }
    }

    /// Encodes as `{ "initAuth": true, "requestId": ... }`.
    #[must_use]
    pub fn to_data(&self) -> FrameData {
        let mut map = Map::new();
        map.insert("initAuth".to_string(), Value::Bool(true));
        if let Some(request_id) = self.request_id {
            map.insert("requestId".to_string(), Value::String(request_id.to_string()));
        }
        FrameData::Json(Value::Object(map))
    }

    /// Recognizes an `initAuth` signal.
    ///
    /// Returns `Ok(None)` for any other message.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::MalformedMessage` if the signal carries an
    /// invalid `requestId`.
    pub fn parse(data: &FrameData) -> Result<Option<Self>, RelayError> {
        if data.is_provider_noise() {
            return Ok(None);
        }
        let Ok(value) = data.to_json() else {
            return Ok(None);
        };
        if value.get("initAuth").and_then(Value::as_bool) != Some(true) {
            return Ok(None);
        }
        let request_id = parse_request_id(&value)?;
        Ok(Some(Self { request_id }))
    }
}

/// Outcome carried by a relay page reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Sign-in succeeded.
    SignedIn(Profile),
    /// Sign-in failed.
    Failed {
        /// Error class name reported by the provider.
        name: String,
        /// Provider error code.
        code: String,
        /// Provider error message.
        message: String,
    },
}

/// The relay page's reply to an `initAuth` signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReply {
    /// Echoed correlation id.
    pub request_id: Option<RequestId>,
    /// What happened.
    pub outcome: FrameOutcome,
}

impl FrameReply {
    /// Builds a success reply.
    #[must_use]
    pub fn signed_in(request_id: Option<RequestId>, profile: Profile) -> Self {
        Self {
            request_id,
            outcome: FrameOutcome::SignedIn(profile),
        }
    }

    /// Builds a failure reply.
    #[must_use]
    pub fn failed(
        request_id: Option<RequestId>,
        name: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            outcome: FrameOutcome::Failed {
                name: name.into(),
                code: code.into(),
                message: message.into(),
            },
        }
    }

    /// Encodes the reply as JSON text.
    ///
    /// Success: `{ "user", "userCredential": { "user" }, "requestId"? }`.
    /// Failure: `{ "name", "code", "message", "requestId"? }`.
    #[must_use]
    pub fn to_data(&self) -> FrameData {
        let mut value = match &self.outcome {
            FrameOutcome::SignedIn(profile) => match serde_json::to_value(profile) {
                Ok(user) => json!({ "user": user, "userCredential": { "user": user } }),
                Err(e) => {
                    error!(error = %e, "failed to serialize signed-in profile");
                    let error = RelayError::malformed(e.to_string());
                    json!({
                        "name": "RelayError",
                        "code": error.code(),
                        "message": error.to_string(),
                    })
                }
            },
            FrameOutcome::Failed {
                name,
                code,
                message,
            } => json!({ "name": name, "code": code, "message": message }),
        };
        if let (Some(request_id), Value::Object(map)) = (self.request_id, &mut value) {
            map.insert("requestId".to_string(), Value::String(request_id.to_string()));
        }
        FrameData::Text(value.to_string())
    }

    /// Parses a message received from the relay page.
    ///
    /// Returns `Ok(None)` for provider-library noise.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::MalformedMessage` for anything that is neither
    /// noise nor a well-formed reply.
    pub fn parse(data: &FrameData) -> Result<Option<Self>, RelayError> {
        if data.is_provider_noise() {
            return Ok(None);
        }
        let value = data.to_json()?;
        let Value::Object(map) = &value else {
            return Err(RelayError::malformed("frame reply is not an object"));
        };
        let request_id = parse_request_id(&value)?;

        if let Some(user) = map.get("user").filter(|user| !user.is_null()) {
            let profile: Profile = serde_json::from_value(user.clone())
                .map_err(|e| RelayError::malformed(format!("invalid user: {e}")))?;
            return Ok(Some(Self::signed_in(request_id, profile)));
        }

        let code = map.get("code").and_then(Value::as_str);
        let message = map.get("message").and_then(Value::as_str);
        if code.is_none() && message.is_none() {
            return Err(RelayError::malformed(
                "frame reply carries neither `user` nor an error",
            ));
        }
        let name = map
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("ProviderError");
        Ok(Some(Self::failed(
            request_id,
            name,
            code.unwrap_or("auth/internal-error"),
            message.unwrap_or_default(),
        )))
    }

    /// Converts the reply into the response returned up the relay chain.
    #[must_use]
    pub fn into_response(self) -> RelayResponse {
        match self.outcome {
            FrameOutcome::SignedIn(profile) => RelayResponse::Authenticated(profile),
            FrameOutcome::Failed { code, message, .. } => {
                RelayResponse::Failed(ErrorBody::new(code, message))
            }
        }
    }
}

fn parse_request_id(value: &Value) -> Result<Option<RequestId>, RelayError> {
    match value.get("requestId") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => id
            .parse()
            .map(Some)
            .map_err(|e: identity_relay_core::ParseIdError| RelayError::malformed(e.to_string())),
        Some(_) => Err(RelayError::malformed("`requestId` is not a string")),
    }
}
