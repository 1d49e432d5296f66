//! The browser's offscreen document API, as seen by the controller.
//!
//! The platform allows at most one offscreen document per extension.
//! [`OffscreenLifecycle`](crate::lifecycle::OffscreenLifecycle) enforces that
//! on top of these traits; implementations only create and close.

use crate::config::ExtensionConfig;
use crate::offscreen::OffscreenHost;
use crate::storage::{KeyValueStore, ProfileCache};
use async_trait::async_trait;
use identity_relay_protocol::{
    FramePort, LifecycleError, RelayRequest, RelayResponse, frame_pair,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// A live offscreen document.
#[async_trait]
pub trait OffscreenDocument: Send + Sync {
    /// Forwards a request to the document and waits for its single reply.
    ///
    /// Failures come back as `RelayResponse::Failed`.
    async fn forward(&self, request: RelayRequest) -> RelayResponse;

    /// Closes the document. Closing a closed document succeeds.
    async fn close(&self) -> Result<(), LifecycleError>;
}

/// Creates offscreen documents.
#[async_trait]
pub trait OffscreenPlatform: Send + Sync + 'static {
    /// Creates a new offscreen document.
    async fn create_document(&self) -> Result<Arc<dyn OffscreenDocument>, LifecycleError>;
}

/// Loads the relay page into a freshly created offscreen document's frame.
pub trait RelayFrameFactory: Send + Sync + 'static {
    /// Starts a relay page attached to `port`.
    ///
    /// The page must stop once its port's peer is dropped.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::CreateFailed` if the page cannot be loaded.
    fn spawn_relay_page(&self, port: FramePort) -> Result<(), LifecycleError>;
}

/// Offscreen platform that runs each document as an in-process
/// [`OffscreenHost`] embedding a relay page from a [`RelayFrameFactory`].
pub struct LocalOffscreenPlatform<S, F> {
    store: S,
    storage_key: String,
    extension_origin: String,
    relay_origin: String,
    auth_timeout: Duration,
    frames: F,
}

impl<S, F> LocalOffscreenPlatform<S, F>
where
    S: KeyValueStore + Clone + 'static,
    F: RelayFrameFactory,
{
    /// Creates a platform from the extension config.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured relay page URL is invalid.
    pub fn new(config: &ExtensionConfig, store: S, frames: F) -> Result<Self, url::ParseError> {
        Ok(Self {
            store,
            storage_key: config.storage_key.clone(),
            extension_origin: config.extension_origin(),
            relay_origin: config.relay_page_origin()?,
            auth_timeout: config.auth_timeout(),
            frames,
        })
    }
}

#[async_trait]
impl<S, F> OffscreenPlatform for LocalOffscreenPlatform<S, F>
where
    S: KeyValueStore + Clone + 'static,
    F: RelayFrameFactory,
{
    async fn create_document(&self) -> Result<Arc<dyn OffscreenDocument>, LifecycleError> {
        let (parent, child) = frame_pair(self.extension_origin.clone(), self.relay_origin.clone());
        self.frames.spawn_relay_page(child)?;

        let cache = ProfileCache::with_key(self.store.clone(), self.storage_key.clone());
        let client = OffscreenHost::spawn(parent, cache, self.auth_timeout).await;
        info!(relay_origin = %self.relay_origin, "offscreen document created");
        Ok(Arc::new(client))
    }
}
