//! In-memory identity provider.
//!
//! Backs tests and the harness. Interactive sign-in replays a scripted queue
//! of outcomes; email/password flows run against an account table with the
//! same validation and error codes as the hosted provider.

use crate::client::IdentityProvider;
use crate::error::{AuthError, AuthErrorCode};
use async_trait::async_trait;
use identity_relay_core::ProviderUser;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Minimum password length accepted at sign-up.
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone)]
struct Account {
    password: String,
    user: ProviderUser,
    disabled: bool,
}

#[derive(Debug, Default)]
struct State {
    interactive: VecDeque<Result<ProviderUser, AuthError>>,
    interactive_calls: usize,
    accounts: HashMap<String, Account>,
    resets: Vec<String>,
    next_uid: u64,
}

/// An identity provider that keeps everything in memory.
#[derive(Debug)]
pub struct InMemoryProvider {
    state: Mutex<State>,
    session: watch::Sender<Option<ProviderUser>>,
    interactive_delay: Option<Duration>,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    /// Creates a provider with no accounts and nobody signed in.
    #[must_use]
    pub fn new() -> Self {
        let (session, _) = watch::channel(None);
        Self {
            state: Mutex::new(State::default()),
            session,
            interactive_delay: None,
        }
    }

    /// Makes every interactive sign-in take this long before completing.
    #[must_use]
    pub fn with_interactive_delay(mut self, delay: Duration) -> Self {
        self.interactive_delay = Some(delay);
        self
    }

    /// Queues the outcome of the next interactive sign-in.
    pub fn script_interactive(&self, outcome: Result<ProviderUser, AuthError>) {
        self.lock().interactive.push_back(outcome);
    }

    /// Adds an email/password account.
    pub fn add_account(&self, email: &str, password: &str, user: ProviderUser) {
        self.lock().accounts.insert(
            normalize_email(email),
            Account {
                password: password.to_string(),
                user,
                disabled: false,
            },
        );
    }

    /// Disables an account; later sign-ins fail with `auth/user-disabled`.
    pub fn disable_account(&self, email: &str) {
        if let Some(account) = self.lock().accounts.get_mut(&normalize_email(email)) {
            account.disabled = true;
        }
    }

    /// Emails that credential resets were sent to, in order.
    #[must_use]
    pub fn reset_requests(&self) -> Vec<String> {
        self.lock().resets.clone()
    }

    /// Number of interactive sign-ins attempted.
    #[must_use]
    pub fn interactive_calls(&self) -> usize {
        self.lock().interactive_calls
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, user: Option<ProviderUser>) {
        self.session.send_replace(user);
    }
}

#[async_trait]
impl IdentityProvider for InMemoryProvider {
    async fn sign_in_interactive(&self) -> Result<ProviderUser, AuthError> {
        let outcome = {
            let mut state = self.lock();
            state.interactive_calls += 1;
            state.interactive.pop_front()
        };
        if let Some(delay) = self.interactive_delay {
            tokio::time::sleep(delay).await;
        }
        let user = outcome.unwrap_or_else(|| {
            Err(AuthError::from_code(
                &AuthErrorCode::PopupClosedByUser,
                "the popup was closed before sign-in finished",
            ))
        })?;
        debug!(uid = %user.uid, "interactive sign-in succeeded");
        self.publish(Some(user.clone()));
        Ok(user)
    }

    async fn sign_in_with_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderUser, AuthError> {
        validate_email(email)?;
        let user = {
            let state = self.lock();
            let account = state.accounts.get(&normalize_email(email)).ok_or_else(|| {
                AuthError::from_code(&AuthErrorCode::UserNotFound, "no account for this email")
            })?;
            if account.disabled {
                return Err(AuthError::from_code(
                    &AuthErrorCode::UserDisabled,
                    "the account is disabled",
                ));
            }
            if account.password != password {
                return Err(AuthError::from_code(
                    &AuthErrorCode::WrongPassword,
                    "the password is invalid",
                ));
            }
            account.user.clone()
        };
        debug!(uid = %user.uid, "credential sign-in succeeded");
        self.publish(Some(user.clone()));
        Ok(user)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<ProviderUser, AuthError> {
        validate_email(email)?;
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::from_code(
                &AuthErrorCode::WeakPassword,
                format!("password should be at least {MIN_PASSWORD_LEN} characters"),
            ));
        }
        let user = {
            let mut state = self.lock();
            let key = normalize_email(email);
            if state.accounts.contains_key(&key) {
                return Err(AuthError::from_code(
                    &AuthErrorCode::EmailAlreadyInUse,
                    "the email address is already in use",
                ));
            }
            state.next_uid += 1;
            let uid = format!("user-{}", state.next_uid);
            let mut user = ProviderUser::new(uid.clone(), "password");
            user.email = Some(email.trim().to_string());
            user.display_name = display_name
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string);
            user.id_token = Some(format!("id-token-{uid}"));
            user.refresh_token = Some(format!("refresh-token-{uid}"));
            state.accounts.insert(
                key,
                Account {
                    password: password.to_string(),
                    user: user.clone(),
                    disabled: false,
                },
            );
            user
        };
        debug!(uid = %user.uid, "account created");
        self.publish(Some(user.clone()));
        Ok(user)
    }

    async fn reset_credential(&self, email: &str) -> Result<(), AuthError> {
        validate_email(email)?;
        let mut state = self.lock();
        let key = normalize_email(email);
        if !state.accounts.contains_key(&key) {
            return Err(AuthError::from_code(
                &AuthErrorCode::UserNotFound,
                "no account for this email",
            ));
        }
        state.resets.push(key);
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.publish(None);
        Ok(())
    }

    fn watch(&self) -> watch::Receiver<Option<ProviderUser>> {
        self.session.subscribe()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str) -> Result<(), AuthError> {
    let email = email.trim();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if valid {
        Ok(())
    } else {
        Err(AuthError::from_code(
            &AuthErrorCode::InvalidEmail,
            "the email address is badly formatted",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn google_user(uid: &str) -> ProviderUser {
        let mut user = ProviderUser::new(uid, "google.com");
        user.email = Some(format!("{uid}@example.com"));
        user.id_token = Some("secret".to_string());
        user
    }

    #[tokio::test]
    async fn interactive_replays_script_in_order() {
        let provider = InMemoryProvider::new();
        provider.script_interactive(Ok(google_user("u1")));
        provider.script_interactive(Err(AuthError::from_code(
            &AuthErrorCode::PopupBlocked,
            "blocked",
        )));

        let user = provider.sign_in_interactive().await.expect("first");
        assert_eq!(user.uid, "u1");
        assert_eq!(provider.current_user().map(|u| u.uid), Some("u1".to_string()));

        let err = provider.sign_in_interactive().await.unwrap_err();
        assert_eq!(err.kind(), AuthErrorCode::PopupBlocked);

        let err = provider.sign_in_interactive().await.unwrap_err();
        assert_eq!(err.kind(), AuthErrorCode::PopupClosedByUser);
        assert_eq!(provider.interactive_calls(), 3);
    }

    #[tokio::test]
    async fn credential_sign_in_checks_account() {
        let provider = InMemoryProvider::new();
        provider.add_account("a@example.com", "hunter22", google_user("u1"));

        let err = provider
            .sign_in_with_credentials("nobody@example.com", "x")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AuthErrorCode::UserNotFound);

        let err = provider
            .sign_in_with_credentials("a@example.com", "wrong")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AuthErrorCode::WrongPassword);

        let err = provider
            .sign_in_with_credentials("not-an-email", "x")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AuthErrorCode::InvalidEmail);

        let user = provider
            .sign_in_with_credentials("A@Example.com", "hunter22")
            .await
            .expect("sign in");
        assert_eq!(user.uid, "u1");

        provider.disable_account("a@example.com");
        let err = provider
            .sign_in_with_credentials("a@example.com", "hunter22")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AuthErrorCode::UserDisabled);
    }

    #[tokio::test]
    async fn sign_up_applies_display_name() {
        let provider = InMemoryProvider::new();
        let mut session = provider.watch();

        let user = provider
            .sign_up("new@example.com", "secret1", Some("New User"))
            .await
            .expect("sign up");
        assert_eq!(user.display_name.as_deref(), Some("New User"));
        assert_eq!(user.provider_id, "password");
        assert!(user.id_token.is_some());

        session.changed().await.expect("session update");
        assert_eq!(
            session.borrow().as_ref().map(|u| u.uid.clone()),
            Some(user.uid.clone())
        );

        let err = provider
            .sign_up("new@example.com", "secret1", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AuthErrorCode::EmailAlreadyInUse);

        let err = provider
            .sign_up("other@example.com", "123", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AuthErrorCode::WeakPassword);
    }

    #[tokio::test]
    async fn reset_is_recorded_for_known_accounts() {
        let provider = InMemoryProvider::new();
        provider.add_account("a@example.com", "hunter22", google_user("u1"));

        provider
            .reset_credential("a@example.com")
            .await
            .expect("reset");
        let err = provider
            .reset_credential("b@example.com")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AuthErrorCode::UserNotFound);
        assert_eq!(provider.reset_requests(), vec!["a@example.com".to_string()]);
    }

    #[tokio::test]
    async fn sign_out_clears_session() {
        let provider = InMemoryProvider::new();
        provider.script_interactive(Ok(google_user("u1")));
        provider.sign_in_interactive().await.expect("sign in");

        provider.sign_out().await.expect("sign out");
        assert!(provider.current_user().is_none());
    }
}
