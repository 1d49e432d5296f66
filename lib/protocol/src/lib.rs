//! Message protocol shared by every context of the relay.
//!
//! The relay spans four isolated contexts (popup, controller, offscreen
//! document, embedded relay frame) that can only talk by message. This crate
//! defines what those messages look like and how they are matched up:
//!
//! - **Requests and responses**: [`RelayRequest`] / [`RelayResponse`], with a
//!   strict wire form and a parser that rejects anything else
//! - **Extension messages**: `{ type, target?, requestId? }` envelopes
//! - **Frame messages**: the `initAuth` signal and the relay page's replies,
//!   including filtering of provider-library noise
//! - **External messages**: notifications from the web app to the extension
//! - **Correlation**: [`Correlator`] maps request ids to pending replies
//! - **Errors**: the relay error taxonomy and its [`ErrorBody`] wire form

pub mod correlation;
pub mod error;
pub mod external;
pub mod frame;
pub mod message;

pub use correlation::{Correlator, Resolution};
pub use error::{ErrorBody, LifecycleError, RelayError, StorageUnavailableError};
pub use external::{ExternalAck, ExternalMessage, ExternalMessenger};
pub use frame::{
    FrameData, FrameEvent, FrameOutcome, FramePort, FrameReceiver, FrameReply, FrameSender,
    InitAuth, PROVIDER_NOISE_PREFIX, WILDCARD_ORIGIN, frame_pair,
};
pub use message::{ExtensionMessage, RelayRequest, RelayResponse, Target};
