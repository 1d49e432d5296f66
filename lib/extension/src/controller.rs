//! The extension controller.
//!
//! The single dispatch point for extension-side requests. It answers
//! `QueryState` and `SignOut` from storage directly and runs
//! `StartInteractiveAuth` through the offscreen document, which it creates
//! on demand and tears down once the last request using it is done.
//!
//! It is also the trust boundary for notifications from the web app: only
//! allow-listed origins may write the cached identity.

use crate::config::ExtensionConfig;
use crate::lifecycle::OffscreenLifecycle;
use crate::platform::OffscreenPlatform;
use crate::storage::{KeyValueStore, ProfileCache};
use async_trait::async_trait;
use identity_relay_protocol::{
    ExtensionMessage, ExternalAck, ExternalMessage, RelayError, RelayRequest, RelayResponse,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Something that answers relay requests.
///
/// The popup only sees this trait.
#[async_trait]
pub trait RelayDispatch: Send + Sync {
    /// Handles a request and returns its single response.
    async fn dispatch(&self, request: RelayRequest) -> RelayResponse;
}

#[async_trait]
impl<D: RelayDispatch + ?Sized> RelayDispatch for Arc<D> {
    async fn dispatch(&self, request: RelayRequest) -> RelayResponse {
        (**self).dispatch(request).await
    }
}

/// The extension's background controller.
pub struct ExtensionController<S, P> {
    cache: ProfileCache<S>,
    lifecycle: OffscreenLifecycle<P>,
    config: ExtensionConfig,
}

impl<S, P> ExtensionController<S, P>
where
    S: KeyValueStore,
    P: OffscreenPlatform,
{
    /// Creates a controller over `store` and the offscreen `platform`.
    #[must_use]
    pub fn new(config: ExtensionConfig, store: S, platform: P) -> Self {
        Self {
            cache: ProfileCache::with_key(store, config.storage_key.clone()),
            lifecycle: OffscreenLifecycle::new(platform),
            config,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ExtensionConfig {
        &self.config
    }

    /// Returns the offscreen document lifecycle.
    #[must_use]
    pub fn lifecycle(&self) -> &OffscreenLifecycle<P> {
        &self.lifecycle
    }

    /// Handles a request. Never fails; failures come back as
    /// `RelayResponse::Failed`.
    #[instrument(skip(self))]
    pub async fn handle(&self, request: RelayRequest) -> RelayResponse {
        match request {
            RelayRequest::StartInteractiveAuth => self.start_interactive_auth().await,
            RelayRequest::QueryState => match self.cache.load().await {
                Ok(profile) => RelayResponse::from_profile(profile),
                Err(e) => {
                    warn!(error = %e, "failed to read cached profile");
                    RelayResponse::failed(e)
                }
            },
            RelayRequest::SignOut => match self.cache.clear().await {
                Ok(()) => {
                    info!("signed out");
                    RelayResponse::SignedOut
                }
                Err(e) => {
                    warn!(error = %e, "failed to clear cached profile");
                    RelayResponse::failed(e)
                }
            },
        }
    }

    /// Handles a raw message from the extension bus.
    ///
    /// Returns `None` for messages addressed to another context. Anything
    /// unparseable is answered with an error response.
    pub async fn handle_message(&self, message: &Value) -> Option<Value> {
        let message = match ExtensionMessage::parse(message) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "rejecting extension message");
                return Some(RelayResponse::failed(e).to_value());
            }
        };
        if message.is_for_offscreen() {
            return None;
        }
        Some(self.handle(message.request).await.to_value())
    }

    /// Handles a notification from the web app.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::UntrustedSender` if `sender_origin` is not
    /// allow-listed, and a parse error for anything that is not an external
    /// message. Stored state is untouched in both cases.
    #[instrument(skip(self, message))]
    pub async fn on_external_notification(
        &self,
        sender_origin: &str,
        message: &Value,
    ) -> Result<ExternalAck, RelayError> {
        if !self.config.allows_external(sender_origin) {
            warn!("rejecting external notification from untrusted origin");
            return Err(RelayError::UntrustedSender {
                origin: sender_origin.to_string(),
            });
        }
        let message = ExternalMessage::parse(message)?;
        let result = match &message {
            ExternalMessage::LoginSuccess { user } => self.cache.save(user).await,
            ExternalMessage::LogoutSuccess => self.cache.clear().await,
        };
        match result {
            Ok(()) => {
                info!(kind = message.wire_tag(), "applied external notification");
                Ok(ExternalAck::ok())
            }
            Err(e) => {
                warn!(error = %e, kind = message.wire_tag(), "failed to apply external notification");
                Ok(ExternalAck { success: false })
            }
        }
    }

    async fn start_interactive_auth(&self) -> RelayResponse {
        let lease = match self.lifecycle.acquire().await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(error = %e, "offscreen document unavailable");
                return RelayResponse::failed(e);
            }
        };
        let response = lease
            .document()
            .forward(RelayRequest::StartInteractiveAuth)
            .await;
        if let Err(e) = self.lifecycle.release(lease).await {
            warn!(error = %e, "failed to close offscreen document");
        }

        if let RelayResponse::Authenticated(profile) = &response {
            if let Err(e) = self.cache.save(profile).await {
                warn!(error = %e, "failed to persist signed-in profile");
                return RelayResponse::failed(e);
            }
        }
        debug!(is_error = response.is_error(), "interactive auth finished");
        response
    }
}

#[async_trait]
impl<S, P> RelayDispatch for ExtensionController<S, P>
where
    S: KeyValueStore,
    P: OffscreenPlatform,
{
    async fn dispatch(&self, request: RelayRequest) -> RelayResponse {
        self.handle(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{LocalOffscreenPlatform, RelayFrameFactory};
    use crate::storage::MemoryStore;
    use identity_relay_core::{Profile, ProviderUser};
    use identity_relay_page::{RelayPage, RelayPageConfig};
    use identity_relay_protocol::{FramePort, LifecycleError};
    use identity_relay_provider::{AuthError, AuthErrorCode, InMemoryProvider};
    use serde_json::json;
    use std::time::Duration;

    const SPA: &str = "https://app.example.com";

    struct PageFactory {
        provider: Arc<InMemoryProvider>,
        ancestor: String,
    }

    impl RelayFrameFactory for PageFactory {
        fn spawn_relay_page(&self, port: FramePort) -> Result<(), LifecycleError> {
            let page = RelayPage::new(
                port,
                Arc::clone(&self.provider),
                RelayPageConfig::with_ancestor(self.ancestor.clone()),
            );
            tokio::spawn(page.run());
            Ok(())
        }
    }

    type TestController =
        ExtensionController<Arc<MemoryStore>, LocalOffscreenPlatform<Arc<MemoryStore>, PageFactory>>;

    fn config() -> ExtensionConfig {
        ExtensionConfig::new("abcdef", SPA, "https://signin.example.com/relay.html")
            .allow_external_origin(SPA)
    }

    fn controller(provider: Arc<InMemoryProvider>) -> (Arc<MemoryStore>, Arc<TestController>) {
        let config = config();
        let store = Arc::new(MemoryStore::new());
        let frames = PageFactory {
            provider,
            ancestor: config.extension_origin(),
        };
        let platform =
            LocalOffscreenPlatform::new(&config, Arc::clone(&store), frames).expect("platform");
        let controller = ExtensionController::new(config, Arc::clone(&store), platform);
        (store, Arc::new(controller))
    }

    fn google_user(uid: &str) -> ProviderUser {
        let mut user = ProviderUser::new(uid, "google.com");
        user.email = Some(format!("{uid}@example.com"));
        user.id_token = Some("secret".to_string());
        user
    }

    #[tokio::test]
    async fn interactive_auth_round_trip() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.script_interactive(Ok(google_user("u1")));
        let (_store, controller) = controller(provider);

        let response = controller.handle(RelayRequest::StartInteractiveAuth).await;
        let profile = response.profile().expect("authenticated");
        assert_eq!(profile.id, "u1");

        assert!(!controller.lifecycle().is_live().await);
        assert_eq!(controller.lifecycle().creations(), 1);
        assert_eq!(
            controller.handle(RelayRequest::QueryState).await,
            RelayResponse::Authenticated(profile.clone())
        );
    }

    #[tokio::test]
    async fn interactive_failure_is_returned_and_host_torn_down() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.script_interactive(Err(AuthError::from_code(
            &AuthErrorCode::PopupBlocked,
            "popup blocked",
        )));
        let (_store, controller) = controller(provider);

        let response = controller.handle(RelayRequest::StartInteractiveAuth).await;
        assert_eq!(
            response.error().map(|e| e.code.as_str()),
            Some("auth/popup-blocked")
        );
        assert!(!controller.lifecycle().is_live().await);
        assert_eq!(
            controller.handle(RelayRequest::QueryState).await,
            RelayResponse::SignedOut
        );
    }

    #[tokio::test]
    async fn concurrent_interactive_auth_shares_one_document() {
        let provider = Arc::new(
            InMemoryProvider::new().with_interactive_delay(Duration::from_millis(20)),
        );
        provider.script_interactive(Ok(google_user("u1")));
        provider.script_interactive(Ok(google_user("u2")));
        let (_store, controller) = controller(Arc::clone(&provider));

        let first = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.handle(RelayRequest::StartInteractiveAuth).await }
        });
        let second = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.handle(RelayRequest::StartInteractiveAuth).await }
        });
        let first = first.await.expect("join");
        let second = second.await.expect("join");

        let mut uids: Vec<String> = [first, second]
            .iter()
            .map(|r| r.profile().expect("authenticated").id.clone())
            .collect();
        uids.sort();
        assert_eq!(uids, ["u1", "u2"]);
        assert_eq!(controller.lifecycle().creations(), 1);
        assert_eq!(provider.interactive_calls(), 2);
        assert!(!controller.lifecycle().is_live().await);
    }

    #[tokio::test]
    async fn abandoned_interactive_auth_still_tears_down() {
        let provider = Arc::new(
            InMemoryProvider::new().with_interactive_delay(Duration::from_millis(200)),
        );
        provider.script_interactive(Ok(google_user("u1")));
        provider.script_interactive(Ok(google_user("u2")));
        let (_store, controller) = controller(Arc::clone(&provider));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            controller.handle(RelayRequest::StartInteractiveAuth),
        )
        .await;
        assert!(abandoned.is_err());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!controller.lifecycle().is_live().await);

        let response = controller.handle(RelayRequest::StartInteractiveAuth).await;
        assert!(response.profile().is_some(), "{response:?}");
        assert!(!controller.lifecycle().is_live().await);
        assert_eq!(controller.lifecycle().creations(), 2);
    }

    #[tokio::test]
    async fn sign_out_then_query_is_signed_out() {
        let (store, controller) = controller(Arc::new(InMemoryProvider::new()));
        ProfileCache::new(Arc::clone(&store))
            .save(&Profile::new("u1"))
            .await
            .expect("save");
        assert!(controller.handle(RelayRequest::QueryState).await.profile().is_some());

        assert_eq!(
            controller.handle(RelayRequest::SignOut).await,
            RelayResponse::SignedOut
        );
        assert_eq!(
            controller.handle(RelayRequest::QueryState).await.to_value(),
            json!({ "profile": null })
        );
        assert_eq!(controller.lifecycle().creations(), 0);
    }

    #[tokio::test]
    async fn storage_failure_becomes_error_response() {
        let (store, controller) = controller(Arc::new(InMemoryProvider::new()));
        store.set_unavailable(true);

        let response = controller.handle(RelayRequest::QueryState).await;
        assert_eq!(
            response.error().map(|e| e.code.as_str()),
            Some("storage/unavailable")
        );
    }

    #[tokio::test]
    async fn handle_message_parses_wire_form() {
        let (_store, controller) = controller(Arc::new(InMemoryProvider::new()));

        let reply = controller
            .handle_message(&json!({ "type": "GET_AUTH_STATE" }))
            .await;
        assert_eq!(reply, Some(json!({ "profile": null })));

        let reply = controller
            .handle_message(&json!({ "type": "PING" }))
            .await
            .expect("reply");
        assert_eq!(reply["error"]["code"], "relay/unknown-message-type");

        let reply = controller.handle_message(&json!(42)).await.expect("reply");
        assert_eq!(reply["error"]["code"], "relay/malformed-message");

        let for_offscreen = json!({ "type": "GET_AUTH_STATE", "target": "offscreen" });
        assert_eq!(controller.handle_message(&for_offscreen).await, None);
    }

    #[tokio::test]
    async fn external_login_and_logout_write_through() {
        let (_store, controller) = controller(Arc::new(InMemoryProvider::new()));
        let login = json!({
            "type": "LOGIN_SUCCESS",
            "user": { "uid": "u7", "email": "u7@example.com", "displayName": null, "photoURL": null },
        });

        let ack = controller
            .on_external_notification(SPA, &login)
            .await
            .expect("accepted");
        assert!(ack.success);
        let profile = controller
            .handle(RelayRequest::QueryState)
            .await
            .profile()
            .cloned()
            .expect("profile");
        assert_eq!(profile.id, "u7");

        controller
            .on_external_notification(SPA, &json!({ "type": "LOGOUT_SUCCESS" }))
            .await
            .expect("accepted");
        assert_eq!(
            controller.handle(RelayRequest::QueryState).await,
            RelayResponse::SignedOut
        );
    }

    #[tokio::test]
    async fn external_notification_from_untrusted_origin_is_rejected() {
        let (store, controller) = controller(Arc::new(InMemoryProvider::new()));
        ProfileCache::new(Arc::clone(&store))
            .save(&Profile::new("u1"))
            .await
            .expect("save");

        let err = controller
            .on_external_notification(
                "https://evil.example.com",
                &json!({ "type": "LOGIN_SUCCESS", "user": { "id": "attacker" } }),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "relay/untrusted-sender");

        let err = controller
            .on_external_notification(
                "https://evil.example.com",
                &json!({ "type": "LOGOUT_SUCCESS" }),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "relay/untrusted-sender");

        let stored = ProfileCache::new(store).load().await.expect("load");
        assert_eq!(stored, Some(Profile::new("u1")));
    }

    #[tokio::test]
    async fn external_login_without_user_is_malformed() {
        let (store, controller) = controller(Arc::new(InMemoryProvider::new()));
        let err = controller
            .on_external_notification(SPA, &json!({ "type": "LOGIN_SUCCESS" }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "relay/malformed-message");
        assert_eq!(ProfileCache::new(store).load().await.expect("load"), None);
    }
}
