//! The relay page's frame loop and sign-in state machine.

use crate::config::RelayPageConfig;
use identity_relay_core::{Profile, RequestId};
use identity_relay_protocol::{FrameEvent, FramePort, FrameReply, InitAuth, RelayError};
use identity_relay_provider::{AuthError, IdentityProvider};
use tracing::{debug, info, instrument, warn};

/// Where the relay page is in its sign-in cycle.
///
/// Every `initAuth` restarts the cycle from `Idle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayState {
    /// Waiting for `initAuth`.
    Idle,
    /// Interactive sign-in is running.
    AwaitingProvider { request_id: Option<RequestId> },
    /// The last sign-in succeeded.
    Succeeded(Profile),
    /// The last sign-in failed.
    Failed(AuthError),
}

/// The relay page: one frame port to the parent and one provider client.
pub struct RelayPage<P> {
    port: FramePort,
    provider: P,
    config: RelayPageConfig,
    state: RelayState,
}

impl<P: IdentityProvider> RelayPage<P> {
    /// Creates a relay page attached to its parent through `port`.
    #[must_use]
    pub fn new(port: FramePort, provider: P, config: RelayPageConfig) -> Self {
        if config.ancestor_origin.is_none() {
            warn!("parent origin unknown; replies will be posted to any origin");
        }
        Self {
            port,
            provider,
            config,
            state: RelayState::Idle,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> &RelayState {
        &self.state
    }

    /// Processes frame events until the parent goes away.
    ///
    /// Returns the final state.
    pub async fn run(mut self) -> RelayState {
        while let Some(event) = self.port.recv().await {
            if let Err(e) = self.handle_event(event).await {
                warn!(error = %e, "failed to deliver sign-in result");
            }
        }
        debug!("parent frame closed");
        self.state
    }

    /// Handles one frame event.
    ///
    /// Returns the reply that was posted, if the event was an accepted
    /// `initAuth`.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ChannelClosed` if the parent disappeared before
    /// the reply could be posted.
    #[instrument(skip(self, event), fields(origin = %event.origin))]
    pub async fn handle_event(
        &mut self,
        event: FrameEvent,
    ) -> Result<Option<FrameReply>, RelayError> {
        if !self.config.accepts(&event.origin) {
            warn!("ignoring frame message from untrusted origin");
            return Ok(None);
        }
        let init = match InitAuth::parse(&event.data) {
            Ok(Some(init)) => init,
            Ok(None) => {
                debug!("ignoring non-initAuth frame message");
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "ignoring malformed initAuth");
                return Ok(None);
            }
        };

        let reply = self.authenticate(init.request_id).await;
        self.port.post(reply.to_data(), self.config.reply_target())?;
        Ok(Some(reply))
    }

    async fn authenticate(&mut self, request_id: Option<RequestId>) -> FrameReply {
        self.state = RelayState::AwaitingProvider { request_id };
        info!(?request_id, "starting interactive sign-in");

        match self.provider.sign_in_interactive().await {
            Ok(user) => {
                let profile = user.profile();
                debug!(uid = %profile.id, "interactive sign-in succeeded");
                self.state = RelayState::Succeeded(profile.clone());
                FrameReply::signed_in(request_id, profile)
            }
            Err(err) => {
                warn!(code = %err.code, "interactive sign-in failed");
                let reply =
                    FrameReply::failed(request_id, &err.name, &err.code, &err.message);
                self.state = RelayState::Failed(err);
                reply
            }
        }
    }
}
