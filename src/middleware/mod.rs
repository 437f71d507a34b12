//! Plug-and-play authentication routes for Axum.
//!
//! Mounts login, refresh, revoke, whoami and logout under
//! [`AuthSettings::auth_path`](crate::AuthSettings), and provides the
//! [`Authenticated`] extractor for protecting application routes.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use gatekeep::middleware::{AuthRoutes, Authenticated, Providers};
//!
//! // 1. Implement PrincipalStore (or use MemoryStore) and register providers
//! let providers = Providers::new().with("ldap", my_ldap_authenticator);
//! let auth = AuthRoutes::new(AuthSettings::from_env()?, Arc::new(store), providers);
//!
//! // 2. Share the gate with your own routes
//! let gate = auth.gate_state();
//! let api = axum::Router::new()
//!     .route("/api/v1/metadata/{*path}", get(metadata))
//!     .with_state(gate);
//!
//! // 3. Mount auth routes
//! let app = api.merge(auth.into_router());
//! ```

mod cookies;
mod error;
mod extractor;
mod routes;
mod state;

pub use error::ROOT_HEADER;
pub use extractor::{API_KEY_HEADER, API_KEY_QUERY_PARAM, Authenticated};
pub use routes::{AuthRoutes, auth_routes};
pub use state::{GateState, Providers};
