#![doc = include_str!("../README.md")]

pub mod authenticator;
pub mod config;
pub mod error;
pub mod gate;
#[cfg(feature = "axum")]
pub mod middleware;
pub mod session;
pub mod store;
pub mod token;
pub mod types;

// Re-exports for convenient access
pub use authenticator::{
    Authenticator, CallbackParams, Credentials, DictionaryAuthenticator, ExternalAuthenticator,
};
pub use config::AuthSettings;
pub use error::{Error, ErrorKind};
pub use gate::{AccessMode, ApiKey, AuthorizationGate, PresentedCredentials, Resolution};
pub use session::{SessionManager, TokenBundle};
pub use store::{MemoryStore, NewSession, PrincipalStore, StoreError};
pub use token::{SecretKey, SecretKeys, TokenError};
pub use types::{
    CurrentPrincipal, Identity, Principal, PrincipalId, PrincipalType, Session, SessionId,
};
