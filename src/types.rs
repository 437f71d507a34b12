use derive_more::{Display, From, FromStr, Into};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Principal identifier (access token `sub` claim).
///
/// Rendered as 32-char lowercase hex in tokens and logs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr, From, Into,
)]
#[display("{}", _0.simple())]
#[serde(transparent)]
pub struct PrincipalId(pub Uuid);

impl PrincipalId {
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Session identifier (refresh token `sid` claim).
///
/// Identifies the session, not the token pair it currently holds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr, From, Into,
)]
#[display("{}", _0.simple())]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalType {
    User,
    Service,
}

/// One external login method bound to a Principal.
///
/// `(provider, id)` is unique across all identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: String,
    pub provider: String,
    #[serde(skip)]
    pub principal_id: PrincipalId,
}

/// An authorization subject together with its identity set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub uuid: PrincipalId,
    #[serde(rename = "type")]
    pub principal_type: PrincipalType,
    pub identities: Vec<Identity>,
}

/// A renewable authenticated session as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub uuid: SessionId,
    pub principal_id: PrincipalId,
    pub time_created: OffsetDateTime,
    pub expiration_time: OffsetDateTime,
    pub time_last_refreshed: Option<OffsetDateTime>,
    pub refresh_count: u64,
    pub revoked: bool,
}

impl Session {
    /// Whether this session may still be slid at `now`.
    #[must_use]
    pub fn is_refreshable_at(&self, now: OffsetDateTime) -> bool {
        !self.revoked && self.expiration_time >= now
    }
}

/// Result of resolving a request's credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentPrincipal {
    /// Single-user mode, authenticated by the configured API key.
    Admin,
    /// Anonymous access: whatever is visible to everyone.
    Public,
    /// A subject reconstructed from access token claims.
    Authenticated(Principal),
}

impl CurrentPrincipal {
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Authenticated(p) => Some(p),
            Self::Admin | Self::Public => None,
        }
    }
}
