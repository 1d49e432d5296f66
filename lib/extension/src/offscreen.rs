//! The offscreen host.
//!
//! A background-capable document that embeds the relay page and mediates
//! between it and the controller. It runs as a single task that owns:
//!
//! - the parent side of the frame channel into the relay page
//! - the in-memory cached profile, seeded from storage at creation
//! - a [`Correlator`] holding the interactive request sent to the relay page
//! - a queue of interactive requests not yet sent
//!
//! The relay page runs one sign-in at a time, so the host keeps at most one
//! `initAuth` outstanding. A request's reply timeout starts when its
//! `initAuth` is posted, not when it is queued.
//!
//! The controller talks to it through an [`OffscreenClient`].

use crate::platform::OffscreenDocument;
use crate::storage::{KeyValueStore, ProfileCache};
use async_trait::async_trait;
use identity_relay_core::{Profile, RequestId};
use identity_relay_protocol::{
    Correlator, ErrorBody, ExtensionMessage, FrameEvent, FrameOutcome, FramePort, FrameReceiver,
    FrameReply, FrameSender, InitAuth, LifecycleError, RelayError, RelayRequest, RelayResponse,
    Resolution,
};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Sleep};
use tracing::{debug, info, instrument, warn};

const COMMAND_BUFFER: usize = 16;

enum HostCommand {
    Forward {
        message: ExtensionMessage,
        reply: oneshot::Sender<RelayResponse>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// The offscreen host task's state.
pub struct OffscreenHost<S> {
    inbox: mpsc::Receiver<HostCommand>,
    frame_tx: FrameSender,
    frame_rx: FrameReceiver,
    frame_open: bool,
    cache: ProfileCache<S>,
    current: Option<Profile>,
    pending: Correlator<RelayResponse>,
    queued: VecDeque<(RequestId, oneshot::Sender<RelayResponse>)>,
    outstanding: Option<RequestId>,
    deadline: Pin<Box<Sleep>>,
    auth_timeout: Duration,
}

impl<S: KeyValueStore + 'static> OffscreenHost<S> {
    /// Starts a host on `frame`, whose peer is the relay page.
    ///
    /// The in-memory profile is seeded from `cache`; if storage cannot be
    /// read the host starts signed out.
    pub async fn spawn(
        frame: FramePort,
        cache: ProfileCache<S>,
        auth_timeout: Duration,
    ) -> OffscreenClient {
        let current = match cache.load().await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, "could not seed offscreen cache from storage");
                None
            }
        };
        let (frame_tx, frame_rx) = frame.split();
        let (tx, inbox) = mpsc::channel(COMMAND_BUFFER);

        let host = Self {
            inbox,
            frame_tx,
            frame_rx,
            frame_open: true,
            cache,
            current,
            pending: Correlator::new(),
            queued: VecDeque::new(),
            outstanding: None,
            deadline: Box::pin(tokio::time::sleep(auth_timeout)),
            auth_timeout,
        };
        tokio::spawn(host.run());
        OffscreenClient { tx }
    }

    async fn run(mut self) {
        debug!(relay_origin = %self.frame_tx.peer_origin(), "offscreen host started");
        loop {
            tokio::select! {
                command = self.inbox.recv() => match command {
                    Some(HostCommand::Forward { message, reply }) => {
                        self.handle_forward(message, reply).await;
                    }
                    Some(HostCommand::Close { done }) => {
                        self.shutdown();
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        self.shutdown();
                        return;
                    }
                },
                event = self.frame_rx.recv(), if self.frame_open => match event {
                    Some(event) => self.handle_frame(event).await,
                    None => {
                        warn!("relay page frame closed");
                        self.frame_open = false;
                        self.fail_all(|| RelayError::ChannelClosed { channel: "frame" }.into());
                    }
                },
                () = &mut self.deadline, if self.outstanding.is_some() => self.expire(),
            }
        }
    }

    #[instrument(skip(self, message, reply), fields(request = %message.request))]
    async fn handle_forward(
        &mut self,
        message: ExtensionMessage,
        reply: oneshot::Sender<RelayResponse>,
    ) {
        match message.request {
            RelayRequest::StartInteractiveAuth => {
                let request_id = message.request_id.unwrap_or_default();
                self.start_interactive(request_id, reply);
            }
            RelayRequest::QueryState => {
                let _ = reply.send(RelayResponse::from_profile(self.current.clone()));
            }
            RelayRequest::SignOut => {
                self.current = None;
                let response = match self.cache.clear().await {
                    Ok(()) => RelayResponse::SignedOut,
                    Err(e) => {
                        warn!(error = %e, "failed to clear cached profile");
                        RelayResponse::failed(e)
                    }
                };
                let _ = reply.send(response);
            }
        }
    }

    fn start_interactive(&mut self, request_id: RequestId, reply: oneshot::Sender<RelayResponse>) {
        if !self.frame_open {
            let _ = reply.send(RelayResponse::failed(RelayError::ChannelClosed {
                channel: "frame",
            }));
            return;
        }
        self.queued.push_back((request_id, reply));
        if self.outstanding.is_some() {
            debug!(%request_id, queued = self.queued.len(), "relay page busy, request queued");
        }
        self.send_next();
    }

    /// Posts `initAuth` for the next queued request unless one is outstanding.
    fn send_next(&mut self) {
        while self.outstanding.is_none() {
            let Some((request_id, reply)) = self.queued.pop_front() else {
                return;
            };
            if reply.is_closed() {
                debug!(%request_id, "caller stopped waiting before initAuth was sent");
                continue;
            }

            let target = self.frame_tx.peer_origin().to_string();
            let delivered = self
                .frame_tx
                .post(InitAuth::new(request_id).to_data(), &target)
                .unwrap_or(false);
            if !delivered {
                let _ = reply.send(RelayResponse::failed(RelayError::ChannelClosed {
                    channel: "frame",
                }));
                continue;
            }
            self.pending.register_sender(request_id, reply);
            self.outstanding = Some(request_id);
            self.deadline
                .as_mut()
                .reset(Instant::now() + self.auth_timeout);
            debug!(%request_id, "initAuth posted to relay page");
        }
    }

    async fn handle_frame(&mut self, event: FrameEvent) {
        if event.origin != self.frame_tx.peer_origin() {
            warn!(origin = %event.origin, "ignoring frame message from unexpected origin");
            return;
        }
        let reply = match FrameReply::parse(&event.data) {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                debug!("filtered provider-internal frame message");
                return;
            }
            Err(e) => {
                warn!(error = %e, "ignoring malformed frame message");
                return;
            }
        };
        if !self.awaits(reply.request_id) {
            warn!(request_id = ?reply.request_id, "no pending request for relay page reply");
            return;
        }

        let request_id = reply.request_id;
        let response = match reply.outcome {
            FrameOutcome::SignedIn(profile) => match self.cache.save(&profile).await {
                Ok(()) => {
                    info!(uid = %profile.id, "interactive sign-in completed");
                    self.current = Some(profile.clone());
                    RelayResponse::Authenticated(profile)
                }
                Err(e) => {
                    warn!(error = %e, "failed to persist signed-in profile");
                    RelayResponse::failed(e)
                }
            },
            outcome @ FrameOutcome::Failed { .. } => FrameReply {
                request_id,
                outcome,
            }
            .into_response(),
        };

        match self.pending.complete(request_id, response) {
            Resolution::Delivered(id) => debug!(request_id = %id, "interactive request resolved"),
            Resolution::Abandoned(id) => {
                debug!(request_id = %id, "caller stopped waiting before the reply arrived");
            }
            Resolution::Unmatched(_) => warn!(?request_id, "reply lost its pending request"),
        }
        self.outstanding = None;
        self.send_next();
    }

    fn awaits(&self, request_id: Option<RequestId>) -> bool {
        match request_id {
            Some(id) => self.pending.contains(id),
            None => self.pending.len() == 1,
        }
    }

    fn expire(&mut self) {
        let Some(request_id) = self.outstanding.take() else {
            return;
        };
        if let Some(reply) = self.pending.take(request_id) {
            let waited_ms = u64::try_from(self.auth_timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(%request_id, waited_ms, "relay page did not answer in time");
            let _ = reply.send(RelayResponse::failed(RelayError::Timeout {
                request_id,
                waited_ms,
            }));
        }
        self.send_next();
    }

    fn fail_all(&mut self, make: impl Fn() -> ErrorBody) {
        self.outstanding = None;
        self.pending.drain_with(|_| RelayResponse::Failed(make()));
        for (_, reply) in self.queued.drain(..) {
            let _ = reply.send(RelayResponse::Failed(make()));
        }
    }

    fn shutdown(&mut self) {
        self.fail_all(|| LifecycleError::DocumentClosed.into());
        info!("offscreen host stopped");
    }
}

/// Handle to a running [`OffscreenHost`].
#[derive(Debug, Clone)]
pub struct OffscreenClient {
    tx: mpsc::Sender<HostCommand>,
}

impl OffscreenClient {
    /// Sends an offscreen-addressed message and waits for the reply.
    pub async fn forward_message(&self, message: ExtensionMessage) -> RelayResponse {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(HostCommand::Forward { message, reply })
            .await
            .is_err()
        {
            return RelayResponse::failed(LifecycleError::DocumentClosed);
        }
        rx.await
            .unwrap_or_else(|_| RelayResponse::failed(LifecycleError::DocumentClosed))
    }

    /// Returns true once the host has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl OffscreenDocument for OffscreenClient {
    async fn forward(&self, request: RelayRequest) -> RelayResponse {
        self.forward_message(ExtensionMessage::to_offscreen(request, RequestId::new()))
            .await
    }

    async fn close(&self) -> Result<(), LifecycleError> {
        let (done, rx) = oneshot::channel();
        if self.tx.send(HostCommand::Close { done }).await.is_err() {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }
}
