//! The identity provider seam.

use crate::error::AuthError;
use async_trait::async_trait;
use identity_relay_core::ProviderUser;
use std::sync::Arc;
use tokio::sync::watch;

/// Client of a hosted identity provider.
///
/// Every sign-in method updates the provider's session, which observers see
/// through [`IdentityProvider::watch`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Runs the provider's interactive (popup) sign-in.
    async fn sign_in_interactive(&self) -> Result<ProviderUser, AuthError>;

    /// Signs in with an email and password.
    async fn sign_in_with_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderUser, AuthError>;

    /// Creates an account and signs it in.
    ///
    /// A display name, when given, is applied to the new account before the
    /// user is returned.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<ProviderUser, AuthError>;

    /// Sends a credential reset email.
    async fn reset_credential(&self, email: &str) -> Result<(), AuthError>;

    /// Ends the provider session.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Subscribes to session changes.
    ///
    /// The receiver's current value is the signed-in user, if any.
    fn watch(&self) -> watch::Receiver<Option<ProviderUser>>;

    /// Returns the signed-in user, if any.
    fn current_user(&self) -> Option<ProviderUser> {
        self.watch().borrow().clone()
    }
}

#[async_trait]
impl<P: IdentityProvider + ?Sized> IdentityProvider for Arc<P> {
    async fn sign_in_interactive(&self) -> Result<ProviderUser, AuthError> {
        (**self).sign_in_interactive().await
    }

    async fn sign_in_with_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderUser, AuthError> {
        (**self).sign_in_with_credentials(email, password).await
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<ProviderUser, AuthError> {
        (**self).sign_up(email, password, display_name).await
    }

    async fn reset_credential(&self, email: &str) -> Result<(), AuthError> {
        (**self).reset_credential(email).await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        (**self).sign_out().await
    }

    fn watch(&self) -> watch::Receiver<Option<ProviderUser>> {
        (**self).watch()
    }
}
