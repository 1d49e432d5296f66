//! In-process wiring of every context and the login/logout round trip.

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use async_trait::async_trait;
use identity_relay_core::{ProviderUser, Result};
use identity_relay_extension::{
    ExtensionConfig, ExtensionController, JsonFileStore, LocalOffscreenPlatform, PopupUi,
    PopupView, RelayDispatch, RelayFrameFactory, TabOpenError, TabOpener,
};
use identity_relay_page::{RelayPage, RelayPageConfig};
use identity_relay_protocol::{
    ExternalAck, ExternalMessage, ExternalMessenger, FramePort, LifecycleError, RelayError,
    RelayRequest, RelayResponse,
};
use identity_relay_provider::InMemoryProvider;
use identity_relay_web::{BridgeOutcome, EntryContext, ExtensionBridge, TabCloser, WebSessionStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, instrument};
use url::Url;

const DEMO_UID: &str = "demo-user";
const DEMO_EMAIL: &str = "demo@example.com";
const DEMO_PASSWORD: &str = "Demo-pass1";
const DEMO_NAME: &str = "Demo User";

type Controller = ExtensionController<
    Arc<JsonFileStore>,
    LocalOffscreenPlatform<Arc<JsonFileStore>, RelayPageFactory>,
>;

/// Spawns a relay page for every offscreen document.
pub struct RelayPageFactory {
    provider: Arc<InMemoryProvider>,
    config: RelayPageConfig,
}

impl RelayFrameFactory for RelayPageFactory {
    fn spawn_relay_page(&self, port: FramePort) -> std::result::Result<(), LifecycleError> {
        let page = RelayPage::new(port, Arc::clone(&self.provider), self.config.clone());
        tokio::spawn(async move {
            let state = page.run().await;
            debug!(?state, "relay page unloaded");
        });
        Ok(())
    }
}

/// Delivers web app notifications to the controller, as the browser does
/// for `chrome.runtime.sendMessage(extensionId, ...)`.
pub struct ControllerMessenger {
    controller: Arc<Controller>,
    sender_origin: String,
}

#[async_trait]
impl ExternalMessenger for ControllerMessenger {
    async fn send_external(
        &self,
        extension_id: &str,
        message: &ExternalMessage,
    ) -> std::result::Result<ExternalAck, RelayError> {
        if extension_id != self.controller.config().extension_id {
            return Err(RelayError::ChannelClosed { channel: "external" });
        }
        let value =
            serde_json::to_value(message).map_err(|e| RelayError::malformed(e.to_string()))?;
        self.controller
            .on_external_notification(&self.sender_origin, &value)
            .await
    }
}

/// Browser tabs opened by the popup and closed by the web app.
#[derive(Debug, Clone, Default)]
pub struct BrowserTabs {
    opened: Arc<Mutex<Vec<Url>>>,
    closed: Arc<AtomicUsize>,
}

impl BrowserTabs {
    /// Returns the most recently opened tab.
    #[must_use]
    pub fn last_opened(&self) -> Option<Url> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    #[must_use]
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TabOpener for BrowserTabs {
    async fn open_tab(&self, url: &Url) -> std::result::Result<(), TabOpenError> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.clone());
        Ok(())
    }
}

#[async_trait]
impl TabCloser for BrowserTabs {
    async fn close_tab(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Popup views observed at each step of the round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundTrip {
    /// After the offscreen interactive sign-in.
    pub interactive: PopupView,
    /// After the popup's logout button.
    pub popup_logout: PopupView,
    /// After signing in on the web app tab opened by the popup.
    pub web_login: PopupView,
    /// After signing out on the web app.
    pub web_logout: PopupView,
}

/// Runs the full round trip:
///
/// 1. interactive sign-in through the offscreen document and relay page
/// 2. logout from the popup
/// 3. login button, email sign-in on the web app, notification back
/// 4. sign-out on the web app, notification back
///
/// # Errors
///
/// Returns a `HarnessError` report naming the first step that failed.
#[instrument(skip_all, fields(extension_id = %config.extension.extension_id))]
pub async fn run(config: &HarnessConfig) -> Result<RoundTrip, HarnessError> {
    let spa_origin = spa_origin(&config.extension)?;
    let relay_provider = Arc::new(InMemoryProvider::new());
    relay_provider.script_interactive(Ok(demo_user("google.com")));
    let web_provider = Arc::new(InMemoryProvider::new());
    web_provider.add_account(DEMO_EMAIL, DEMO_PASSWORD, demo_user("password"));

    let store = Arc::new(JsonFileStore::new(&config.storage_path));
    let frames = RelayPageFactory {
        provider: relay_provider,
        config: config.relay_page_config(),
    };
    let platform = LocalOffscreenPlatform::new(&config.extension, Arc::clone(&store), frames)
        .map_err(|e| HarnessError::InvalidConfig {
            reason: format!("relay page url: {e}"),
        })?;
    let controller: Arc<Controller> = Arc::new(ExtensionController::new(
        config.extension.clone(),
        store,
        platform,
    ));
    let login_url = config
        .extension
        .login_url()
        .map_err(|e| HarnessError::InvalidConfig {
            reason: format!("spa url: {e}"),
        })?;
    let tabs = BrowserTabs::default();
    let mut popup = PopupUi::new(Arc::clone(&controller), tabs.clone(), login_url);

    // Interactive sign-in through the offscreen document.
    let response = controller.dispatch(RelayRequest::StartInteractiveAuth).await;
    if let RelayResponse::Failed(error) = &response {
        return Err(HarnessError::AuthFailed {
            code: error.code.clone(),
            message: error.message.clone(),
        }
        .into());
    }
    let interactive = popup.open().await.clone();
    info!(view = ?interactive, "interactive sign-in complete");

    popup.logout_clicked().await;
    let popup_logout = popup.view().clone();
    info!(view = ?popup_logout, "popup logout complete");

    // Login button: the web app takes over in a new tab.
    popup
        .login_clicked()
        .await
        .map_err(|e| HarnessError::Unexpected {
            step: "login button",
            detail: e.to_string(),
        })?;
    let opened = tabs.last_opened().ok_or_else(|| HarnessError::Unexpected {
        step: "login button",
        detail: "no tab opened".to_string(),
    })?;
    let session = WebSessionStore::spawn(web_provider);
    let bridge = ExtensionBridge::new(
        EntryContext::from_url(opened.as_str()),
        ControllerMessenger {
            controller: Arc::clone(&controller),
            sender_origin: spa_origin,
        },
        tabs.clone(),
    );
    session
        .login_with_email(DEMO_EMAIL, DEMO_PASSWORD)
        .await
        .map_err(|e| HarnessError::WebFlow {
            step: "email sign-in",
            message: e.message,
        })?;
    let state = session
        .subscribe()
        .wait_for(|state| state.user.is_some())
        .await
        .map_err(|e| HarnessError::Unexpected {
            step: "web session",
            detail: e.to_string(),
        })?
        .clone();
    expect_returned("web login", bridge.on_auth_state(&state).await)?;
    let web_login = popup.open().await.clone();
    info!(view = ?web_login, "web sign-in reported");

    let outcome = bridge
        .logout_and_return(&session)
        .await
        .map_err(|e| HarnessError::WebFlow {
            step: "sign-out",
            message: e.message,
        })?;
    expect_returned("web logout", outcome)?;
    let web_logout = popup.open().await.clone();
    info!(view = ?web_logout, tabs_closed = tabs.closed(), "web sign-out reported");

    Ok(RoundTrip {
        interactive,
        popup_logout,
        web_login,
        web_logout,
    })
}

fn demo_user(provider_id: &str) -> ProviderUser {
    let mut user = ProviderUser::new(DEMO_UID, provider_id);
    user.email = Some(DEMO_EMAIL.to_string());
    user.display_name = Some(DEMO_NAME.to_string());
    user.email_verified = true;
    user.id_token = Some(format!("{DEMO_UID}-id-token"));
    user.refresh_token = Some(format!("{DEMO_UID}-refresh-token"));
    user
}

fn spa_origin(config: &ExtensionConfig) -> Result<String, HarnessError> {
    let url = Url::parse(&config.spa_url).map_err(|e| HarnessError::InvalidConfig {
        reason: format!("spa url: {e}"),
    })?;
    Ok(url.origin().ascii_serialization())
}

fn expect_returned(step: &'static str, outcome: BridgeOutcome) -> Result<(), HarnessError> {
    match outcome {
        BridgeOutcome::Returned { delivered: true } => Ok(()),
        other => Err(HarnessError::Unexpected {
            step,
            detail: format!("{other:?}"),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use identity_relay_extension::DEFAULT_PROFILE_KEY;
    use serde_json::Value;

    const SPA: &str = "https://app.example.com";

    fn config(dir: &tempfile::TempDir) -> HarnessConfig {
        let mut config = HarnessConfig::new(
            ExtensionConfig::new("abcdef", SPA, "https://signin.example.com/relay.html")
                .allow_external_origin(SPA),
        );
        config.storage_path = dir.path().join("storage.json");
        config
    }

    fn signed_in() -> PopupView {
        PopupView::SignedIn {
            label: DEMO_NAME.to_string(),
            photo_url: None,
        }
    }

    #[tokio::test]
    async fn full_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(&dir);

        let round_trip = run(&config).await.expect("round trip");

        assert_eq!(
            round_trip,
            RoundTrip {
                interactive: signed_in(),
                popup_logout: PopupView::SignedOut,
                web_login: signed_in(),
                web_logout: PopupView::SignedOut,
            }
        );

        let stored: Value = serde_json::from_str(
            &std::fs::read_to_string(&config.storage_path).expect("storage file"),
        )
        .expect("json");
        assert!(stored.get(DEFAULT_PROFILE_KEY).is_none());
    }

    #[tokio::test]
    async fn untrusted_web_app_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config(&dir);
        config.extension.allowed_external_origins.clear();

        let report = run(&config).await.expect_err("notification rejected");
        assert!(report.to_string().contains("web login"), "{report}");
    }

    #[tokio::test]
    async fn invalid_relay_url_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config(&dir);
        config.extension.relay_page_url = "not a url".to_string();

        let report = run(&config).await.expect_err("invalid config");
        assert!(report.to_string().contains("relay page url"), "{report}");
    }
}
