//! The web app's view of the provider session.

use crate::form::{FormError, SignupForm};
use identity_relay_core::{Profile, ProviderUser};
use identity_relay_provider::{AuthError, AuthFlow, IdentityProvider};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Authentication state observed by the web app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    /// The signed-in user, if any.
    pub user: Option<Profile>,
    /// True until the provider has reported the session for the first time.
    pub loading: bool,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            user: None,
            loading: true,
        }
    }
}

/// Publishes the provider session and runs the web app's sign-in flows.
///
/// A background task follows the provider's session channel for as long as
/// the store lives.
pub struct WebSessionStore<P> {
    provider: Arc<P>,
    state: watch::Receiver<AuthState>,
    observer: JoinHandle<()>,
}

impl<P: IdentityProvider + 'static> WebSessionStore<P> {
    /// Starts observing `provider`'s session.
    #[must_use]
    pub fn spawn(provider: Arc<P>) -> Self {
        let (publisher, state) = watch::channel(AuthState::default());
        let mut session = provider.watch();
        let observer = tokio::spawn(async move {
            loop {
                let user = session.borrow_and_update().as_ref().map(ProviderUser::profile);
                debug!(signed_in = user.is_some(), "session changed");
                publisher.send_replace(AuthState {
                    user,
                    loading: false,
                });
                if session.changed().await.is_err() {
                    break;
                }
            }
        });
        Self {
            provider,
            state,
            observer,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.clone()
    }

    /// Waits for the first session report and returns the state.
    pub async fn ready(&self) -> AuthState {
        let mut state = self.subscribe();
        match state.wait_for(|s| !s.loading).await {
            Ok(ready) => ready.clone(),
            Err(_) => self.state(),
        }
    }

    /// Signs in through the provider's interactive flow.
    ///
    /// # Errors
    ///
    /// Returns the provider failure mapped to its interactive message.
    #[instrument(skip(self))]
    pub async fn login_with_google(&self) -> Result<Profile, FormError> {
        self.provider
            .sign_in_interactive()
            .await
            .map(|user| user.profile())
            .map_err(|e| failed(&e, AuthFlow::Interactive))
    }

    /// Signs in with email and password.
    ///
    /// # Errors
    ///
    /// Returns the provider failure mapped to its sign-in message.
    #[instrument(skip(self, password))]
    pub async fn login_with_email(&self, email: &str, password: &str) -> Result<Profile, FormError> {
        self.provider
            .sign_in_with_credentials(email, password)
            .await
            .map(|user| user.profile())
            .map_err(|e| failed(&e, AuthFlow::SignIn))
    }

    /// Validates the form, then creates the account with its display name.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure without contacting the provider,
    /// or the provider failure mapped to its sign-up message.
    #[instrument(skip_all, fields(email = %form.email))]
    pub async fn signup_with_email(&self, form: &SignupForm) -> Result<Profile, FormError> {
        form.validate()?;
        self.provider
            .sign_up(
                form.email.trim(),
                &form.password,
                Some(form.display_name.trim()),
            )
            .await
            .map(|user| user.profile())
            .map_err(|e| failed(&e, AuthFlow::SignUp))
    }

    /// Sends a password reset email.
    ///
    /// # Errors
    ///
    /// Returns `form/email-required` for an empty email, or the provider
    /// failure mapped to its sign-in message.
    #[instrument(skip(self))]
    pub async fn reset_password(&self, email: &str) -> Result<(), FormError> {
        if email.trim().is_empty() {
            return Err(FormError::new(
                FormError::EMAIL_REQUIRED,
                "Please enter your email to reset the password.",
            ));
        }
        self.provider
            .reset_credential(email)
            .await
            .map_err(|e| failed(&e, AuthFlow::SignIn))
    }

    /// Ends the provider session.
    ///
    /// # Errors
    ///
    /// Returns the provider failure.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), FormError> {
        self.provider
            .sign_out()
            .await
            .map_err(|e| failed(&e, AuthFlow::SignIn))
    }
}

impl<P> Drop for WebSessionStore<P> {
    fn drop(&mut self) {
        self.observer.abort();
    }
}

fn failed(error: &AuthError, flow: AuthFlow) -> FormError {
    warn!(code = %error.code, flow = ?flow, "provider request failed");
    FormError::from_auth(error, flow)
}
