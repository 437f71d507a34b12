//! Pluggable identity-provider verification.
//!
//! A provider runs in one of two modes. An [`Authenticator`] (password mode)
//! checks a username and password posted by the client. An
//! [`ExternalAuthenticator`] (external mode) handles the redirect back from an
//! outside login page, typically exchanging an authorization code. Either way
//! the result is the stable external id the provider knows the user by.

use std::collections::HashMap;
use std::future::Future;

use serde::Deserialize;

/// Raw end-user credentials, as posted to a provider's token route.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"..")
            .finish()
    }
}

/// Consumer-provided credential check for one identity provider.
///
/// # Example
///
/// ```rust,ignore
/// impl Authenticator for LdapAuthenticator {
///     async fn authenticate(
///         &self,
///         credentials: &Credentials,
///     ) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>> {
///         let entry = self.bind(&credentials.username, &credentials.password).await?;
///         Ok(entry.map(|e| e.uid))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Verify `credentials`.
    ///
    /// Returns the external id on success and `None` when the credentials are
    /// rejected. `Err` is reserved for the provider itself failing.
    fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Option<String>, Box<dyn std::error::Error + Send + Sync>>> + Send;
}

/// Query parameters of an external provider's callback, such as `code` and `state`.
pub type CallbackParams = HashMap<String, String>;

/// Consumer-provided callback handling for an external identity provider.
///
/// # Example
///
/// ```rust,ignore
/// impl ExternalAuthenticator for OrcidAuthenticator {
///     async fn authenticate(
///         &self,
///         params: &CallbackParams,
///     ) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>> {
///         let Some(code) = params.get("code") else { return Ok(None) };
///         let token = self.exchange_code(code).await?;
///         Ok(Some(token.orcid))
///     }
/// }
/// ```
pub trait ExternalAuthenticator: Send + Sync + 'static {
    /// Complete a login from the callback's query parameters.
    ///
    /// Returns `None` when the provider does not vouch for the user.
    fn authenticate(
        &self,
        params: &CallbackParams,
    ) -> impl Future<Output = Result<Option<String>, Box<dyn std::error::Error + Send + Sync>>> + Send;
}

/// Fixed username/password table, for tests and demos.
#[derive(Debug, Default, Clone)]
pub struct DictionaryAuthenticator {
    users: HashMap<String, String>,
}

impl DictionaryAuthenticator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }
}

impl Authenticator for DictionaryAuthenticator {
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>> {
        let accepted = self
            .users
            .get(&credentials.username)
            .is_some_and(|expected| *expected == credentials.password);
        Ok(accepted.then(|| credentials.username.clone()))
    }
}
