//! The popup UI.
//!
//! A thin view over the controller: it shows the cached identity, sends
//! fresh logins to the web app in a new tab, and signs out through the
//! controller. Rendering is left to the embedder; this module produces the
//! view model.

use crate::controller::RelayDispatch;
use async_trait::async_trait;
use identity_relay_protocol::{RelayRequest, RelayResponse};
use std::fmt;
use tracing::{debug, warn};
use url::Url;

/// What the popup shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupView {
    /// The login button.
    SignedOut,
    /// The signed-in user and a logout button.
    SignedIn {
        /// Display name, falling back to email, then id.
        label: String,
        /// Avatar URL, if any.
        photo_url: Option<String>,
    },
    /// A request failed; shows the error's message.
    Error(String),
}

impl PopupView {
    /// Builds the view for a controller response.
    #[must_use]
    pub fn from_response(response: &RelayResponse) -> Self {
        match response {
            RelayResponse::Authenticated(profile) => Self::SignedIn {
                label: profile.label().to_string(),
                photo_url: profile.photo_url.clone(),
            },
            RelayResponse::SignedOut => Self::SignedOut,
            RelayResponse::Failed(error) => Self::Error(error.message.clone()),
        }
    }
}

/// What the popup should do after handling a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupAction {
    /// Keep the popup open.
    Stay,
    /// Close the popup.
    Close,
}

/// Failure to open a browser tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabOpenError {
    pub reason: String,
}

impl fmt::Display for TabOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to open tab: {}", self.reason)
    }
}

impl std::error::Error for TabOpenError {}

/// Opens browser tabs.
#[async_trait]
pub trait TabOpener: Send + Sync {
    /// Opens `url` in a new tab.
    async fn open_tab(&self, url: &Url) -> Result<(), TabOpenError>;
}

/// The popup.
pub struct PopupUi<D, T> {
    dispatch: D,
    tabs: T,
    login_url: Url,
    view: PopupView,
}

impl<D: RelayDispatch, T: TabOpener> PopupUi<D, T> {
    /// Creates a popup that opens `login_url` for sign-in.
    #[must_use]
    pub fn new(dispatch: D, tabs: T, login_url: Url) -> Self {
        Self {
            dispatch,
            tabs,
            login_url,
            view: PopupView::SignedOut,
        }
    }

    /// Returns the current view.
    #[must_use]
    pub fn view(&self) -> &PopupView {
        &self.view
    }

    /// Loads the cached identity and renders it.
    pub async fn open(&mut self) -> &PopupView {
        let response = self.dispatch.dispatch(RelayRequest::QueryState).await;
        if let Some(error) = response.error() {
            warn!(code = %error.code, "failed to load auth state");
        }
        self.view = PopupView::from_response(&response);
        &self.view
    }

    /// Sends the user to the web app to sign in.
    ///
    /// # Errors
    ///
    /// Returns `TabOpenError` if the tab cannot be opened; the popup stays.
    pub async fn login_clicked(&mut self) -> Result<PopupAction, TabOpenError> {
        self.tabs.open_tab(&self.login_url).await?;
        debug!(url = %self.login_url, "opened login tab");
        Ok(PopupAction::Close)
    }

    /// Signs out and renders the signed-out view.
    pub async fn logout_clicked(&mut self) -> PopupAction {
        let response = self.dispatch.dispatch(RelayRequest::SignOut).await;
        if let Some(error) = response.error() {
            warn!(code = %error.code, "sign-out failed");
        }
        self.view = PopupView::from_response(&response);
        PopupAction::Stay
    }
}
