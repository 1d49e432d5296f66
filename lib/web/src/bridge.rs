//! Reports web sign-in back to the extension that opened the tab.

use crate::entry::EntryContext;
use crate::form::FormError;
use crate::session::{AuthState, WebSessionStore};
use async_trait::async_trait;
use identity_relay_protocol::{ExternalMessage, ExternalMessenger};
use identity_relay_provider::IdentityProvider;
use tracing::{info, warn};

/// Closes the current browser tab.
#[async_trait]
pub trait TabCloser: Send + Sync {
    async fn close_tab(&self);
}

/// What the bridge did with a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// The tab was not opened by the extension.
    Inactive,
    /// Opened by the extension, but nobody is signed in yet.
    Waiting,
    /// The extension was notified and the tab closed.
    Returned {
        /// Whether the extension acknowledged the notification.
        delivered: bool,
    },
}

/// Sends the session to the extension and hands control back to it.
pub struct ExtensionBridge<M, T> {
    entry: EntryContext,
    messenger: M,
    tabs: T,
}

impl<M: ExternalMessenger, T: TabCloser> ExtensionBridge<M, T> {
    pub fn new(entry: EntryContext, messenger: M, tabs: T) -> Self {
        Self {
            entry,
            messenger,
            tabs,
        }
    }

    #[must_use]
    pub fn entry(&self) -> &EntryContext {
        &self.entry
    }

    /// Reacts to a session state change.
    ///
    /// Once a user is signed in on an extension-opened tab, sends
    /// `LOGIN_SUCCESS` with their profile and closes the tab.
    pub async fn on_auth_state(&self, state: &AuthState) -> BridgeOutcome {
        let Some(extension_id) = self.entry.extension_id() else {
            return BridgeOutcome::Inactive;
        };
        let Some(user) = state.user.clone() else {
            return BridgeOutcome::Waiting;
        };
        let delivered = self
            .send(extension_id, ExternalMessage::LoginSuccess { user })
            .await;
        self.tabs.close_tab().await;
        BridgeOutcome::Returned { delivered }
    }

    /// Signs out, tells the extension, and closes the tab.
    ///
    /// # Errors
    ///
    /// Returns the sign-out failure; the extension is not notified and the
    /// tab stays open.
    pub async fn logout_and_return<P: IdentityProvider + 'static>(
        &self,
        session: &WebSessionStore<P>,
    ) -> Result<BridgeOutcome, FormError> {
        session.logout().await?;
        let delivered = match self.entry.extension_id() {
            Some(extension_id) => self.send(extension_id, ExternalMessage::LogoutSuccess).await,
            None => false,
        };
        self.tabs.close_tab().await;
        Ok(BridgeOutcome::Returned { delivered })
    }

    async fn send(&self, extension_id: &str, message: ExternalMessage) -> bool {
        let kind = message.wire_tag();
        match self.messenger.send_external(extension_id, &message).await {
            Ok(ack) => {
                info!(kind, success = ack.success, "notified extension");
                ack.success
            }
            Err(e) => {
                warn!(kind, error = %e, "failed to notify extension");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use identity_relay_core::{Profile, ProviderUser};
    use identity_relay_protocol::{ExternalAck, RelayError};
    use identity_relay_provider::InMemoryProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingMessenger {
        sent: Mutex<Vec<(String, ExternalMessage)>>,
        fail: bool,
    }

    #[async_trait]
    impl ExternalMessenger for RecordingMessenger {
        async fn send_external(
            &self,
            extension_id: &str,
            message: &ExternalMessage,
        ) -> Result<ExternalAck, RelayError> {
            if self.fail {
                return Err(RelayError::ChannelClosed {
                    channel: "external",
                });
            }
            self.sent
                .lock()
                .expect("lock")
                .push((extension_id.to_string(), message.clone()));
            Ok(ExternalAck::ok())
        }
    }

    #[derive(Default)]
    struct CountingTabs {
        closed: AtomicUsize,
    }

    #[async_trait]
    impl TabCloser for CountingTabs {
        async fn close_tab(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn from_extension() -> EntryContext {
        EntryContext::from_url("https://app.example.com/?source=extension&extensionId=abcdef")
    }

    fn signed_in(profile: Profile) -> AuthState {
        AuthState {
            user: Some(profile),
            loading: false,
        }
    }

    #[tokio::test]
    async fn login_is_reported_and_tab_closed() {
        let bridge = ExtensionBridge::new(
            from_extension(),
            RecordingMessenger::default(),
            CountingTabs::default(),
        );
        let profile = Profile::new("u1").with_email(Some("a@b.com".to_string()));

        let outcome = bridge.on_auth_state(&signed_in(profile.clone())).await;

        assert_eq!(outcome, BridgeOutcome::Returned { delivered: true });
        assert_eq!(
            *bridge.messenger.sent.lock().expect("lock"),
            vec![("abcdef".to_string(), ExternalMessage::LoginSuccess { user: profile })]
        );
        assert_eq!(bridge.tabs.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn waits_for_sign_in() {
        let bridge = ExtensionBridge::new(
            from_extension(),
            RecordingMessenger::default(),
            CountingTabs::default(),
        );

        assert_eq!(bridge.on_auth_state(&AuthState::default()).await, BridgeOutcome::Waiting);
        assert!(bridge.messenger.sent.lock().expect("lock").is_empty());
        assert_eq!(bridge.tabs.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn direct_visits_are_left_alone() {
        let bridge = ExtensionBridge::new(
            EntryContext::Direct,
            RecordingMessenger::default(),
            CountingTabs::default(),
        );

        let outcome = bridge.on_auth_state(&signed_in(Profile::new("u1"))).await;
        assert_eq!(outcome, BridgeOutcome::Inactive);
        assert_eq!(bridge.tabs.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn undeliverable_notification_still_returns() {
        let messenger = RecordingMessenger {
            fail: true,
            ..RecordingMessenger::default()
        };
        let bridge = ExtensionBridge::new(from_extension(), messenger, CountingTabs::default());

        let outcome = bridge.on_auth_state(&signed_in(Profile::new("u1"))).await;
        assert_eq!(outcome, BridgeOutcome::Returned { delivered: false });
        assert_eq!(bridge.tabs.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn logout_and_return() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.script_interactive(Ok(ProviderUser::new("u1", "google.com")));
        let session = WebSessionStore::spawn(Arc::clone(&provider));
        session.login_with_google().await.expect("login");
        let bridge = ExtensionBridge::new(
            from_extension(),
            RecordingMessenger::default(),
            CountingTabs::default(),
        );

        let outcome = bridge.logout_and_return(&session).await.expect("logout");

        assert_eq!(outcome, BridgeOutcome::Returned { delivered: true });
        assert!(provider.current_user().is_none());
        assert_eq!(
            *bridge.messenger.sent.lock().expect("lock"),
            vec![("abcdef".to_string(), ExternalMessage::LogoutSuccess)]
        );
        assert_eq!(bridge.tabs.closed.load(Ordering::SeqCst), 1);
    }
}
