use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::FromRef;

use crate::authenticator::{Authenticator, CallbackParams, Credentials, ExternalAuthenticator};
use crate::config::AuthSettings;
use crate::gate::AuthorizationGate;
use crate::session::SessionManager;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Object-safe wrapper for Authenticator (needed for Arc<dyn>).
pub(super) trait AuthenticatorDyn: Send + Sync {
    fn authenticate_dyn<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, BoxError>> + Send + 'a>>;
}

impl<T: Authenticator> AuthenticatorDyn for T {
    fn authenticate_dyn<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, BoxError>> + Send + 'a>> {
        Box::pin(self.authenticate(credentials))
    }
}

/// Object-safe wrapper for ExternalAuthenticator.
pub(super) trait ExternalAuthenticatorDyn: Send + Sync {
    fn authenticate_dyn<'a>(
        &'a self,
        params: &'a CallbackParams,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, BoxError>> + Send + 'a>>;
}

impl<T: ExternalAuthenticator> ExternalAuthenticatorDyn for T {
    fn authenticate_dyn<'a>(
        &'a self,
        params: &'a CallbackParams,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, BoxError>> + Send + 'a>> {
        Box::pin(self.authenticate(params))
    }
}

/// A registered provider and the login route it answers on.
#[derive(Clone)]
pub(super) enum Provider {
    /// `POST {auth_path}/provider/{name}/token` with a username/password form.
    Password(Arc<dyn AuthenticatorDyn>),
    /// `GET {auth_path}/provider/{name}/code`, the external login callback.
    External(Arc<dyn ExternalAuthenticatorDyn>),
}

/// Registered identity providers, by name.
///
/// An empty registry puts the deployment in single-user mode.
#[derive(Clone, Default)]
pub struct Providers {
    by_name: BTreeMap<String, Provider>,
}

impl Providers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a password-mode provider under `name`, the path segment of its login route.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, authenticator: impl Authenticator) -> Self {
        self.by_name
            .insert(name.into(), Provider::Password(Arc::new(authenticator)));
        self
    }

    /// Register an external-mode provider under `name`.
    #[must_use]
    pub fn with_external(mut self, name: impl Into<String>, authenticator: impl ExternalAuthenticator) -> Self {
        self.by_name
            .insert(name.into(), Provider::External(Arc::new(authenticator)));
        self
    }

    pub(super) fn password(&self, name: &str) -> Option<&Arc<dyn AuthenticatorDyn>> {
        match self.by_name.get(name)? {
            Provider::Password(authenticator) => Some(authenticator),
            Provider::External(_) => None,
        }
    }

    pub(super) fn external(&self, name: &str) -> Option<&Arc<dyn ExternalAuthenticatorDyn>> {
        match self.by_name.get(name)? {
            Provider::External(authenticator) => Some(authenticator),
            Provider::Password(_) => None,
        }
    }

    pub(super) fn names(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.by_name.keys()).finish()
    }
}

/// What the [`Authenticated`](super::Authenticated) extractor needs.
///
/// Add it to your own router state and implement `FromRef` to protect
/// application routes with the same gate the auth routes use.
#[derive(Debug, Clone)]
pub struct GateState {
    pub(super) gate: Arc<AuthorizationGate>,
    pub(super) settings: Arc<AuthSettings>,
}

/// Shared state for auth route handlers.
pub(super) struct AuthState<S> {
    pub(super) manager: SessionManager<S>,
    pub(super) providers: Providers,
    pub(super) gate: GateState,
}

// Manual Clone: avoid derive adding `S: Clone` bound.
impl<S> Clone for AuthState<S> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            providers: self.providers.clone(),
            gate: self.gate.clone(),
        }
    }
}

impl<S> FromRef<AuthState<S>> for GateState {
    fn from_ref(state: &AuthState<S>) -> Self {
        state.gate.clone()
    }
}
