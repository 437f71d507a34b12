//! Durable storage seam for principals, identities and sessions.
//!
//! The session lifecycle only needs the handful of operations below. Each one
//! must be a single atomic step at the store; the engine behind it is the
//! consumer's choice. [`MemoryStore`] is the in-process reference.

pub mod memory;

use std::future::Future;

use time::OffsetDateTime;

use crate::types::{Principal, PrincipalId, PrincipalType, Session, SessionId};

pub use memory::MemoryStore;

/// Store operation failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("uniqueness conflict: {0}")]
    Conflict(String),

    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A session row to insert. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub principal_id: PrincipalId,
    pub time_created: OffsetDateTime,
    pub expiration_time: OffsetDateTime,
}

/// Consumer-provided persistence for the session lifecycle.
///
/// # Example
///
/// ```rust,ignore
/// impl PrincipalStore for PgStore {
///     async fn atomic_increment_refresh_count(
///         &self,
///         session_id: SessionId,
///         refreshed_at: OffsetDateTime,
///     ) -> Result<Option<Session>, StoreError> {
///         // UPDATE sessions
///         //    SET refresh_count = refresh_count + 1, time_last_refreshed = $2
///         //  WHERE uuid = $1 AND NOT revoked AND expiration_time >= $2
///         //  RETURNING *
///         self.update_session(session_id, refreshed_at).await
///     }
///     // ...
/// }
/// ```
pub trait PrincipalStore: Send + Sync + 'static {
    /// Look up the Principal owning identity `(provider, id)`.
    fn find_identity(
        &self,
        provider: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<Principal>, StoreError>> + Send;

    /// Look up a Principal with its full identity set.
    fn find_principal(
        &self,
        principal_id: PrincipalId,
    ) -> impl Future<Output = Result<Option<Principal>, StoreError>> + Send;

    /// Create a Principal and its first Identity in one transaction.
    ///
    /// Must fail with [`StoreError::Conflict`] if `(provider, id)` already exists.
    fn create_principal_and_identity(
        &self,
        principal_type: PrincipalType,
        provider: &str,
        id: &str,
    ) -> impl Future<Output = Result<Principal, StoreError>> + Send;

    /// Insert a session with `revoked = false` and `refresh_count = 0`.
    fn create_session(
        &self,
        session: NewSession,
    ) -> impl Future<Output = Result<Session, StoreError>> + Send;

    fn find_session(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = Result<Option<Session>, StoreError>> + Send;

    /// Increment `refresh_count` and set `time_last_refreshed` store-side.
    ///
    /// Applies only while the session is unrevoked and unexpired at
    /// `refreshed_at`; returns the updated row, or `None` if nothing matched.
    fn atomic_increment_refresh_count(
        &self,
        session_id: SessionId,
        refreshed_at: OffsetDateTime,
    ) -> impl Future<Output = Result<Option<Session>, StoreError>> + Send;

    /// Mark a session revoked. Unknown or already-revoked ids are not an error.
    fn set_revoked(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
