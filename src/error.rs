use crate::store::StoreError;
use crate::token::TokenError;

/// Failure to authenticate or to complete a session operation.
///
/// Every variant is terminal for the current request.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No credential presented and anonymous access is disallowed.
    #[error("Not authenticated")]
    Unauthenticated {
        /// Service base URL, where a client can discover identity providers.
        discovery_url: String,
    },

    /// API key or provider credentials do not verify.
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("Access token has expired. Refresh token.")]
    ExpiredAccessToken,

    /// Reported identically for missing, revoked and expired sessions.
    #[error("Session has expired. Please re-authenticate.")]
    ExpiredOrRevokedSession,

    #[error("Could not validate credentials")]
    InvalidSignature,

    /// No identity provider of this name and mode is registered.
    #[error("Unknown identity provider: {0}")]
    UnknownProvider(String),

    /// The request body could not be read.
    #[error("{0}")]
    BadRequest(String),

    /// An identity provider failed while checking credentials.
    #[error("Identity provider error: {0}")]
    Provider(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Machine-checkable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthenticated,
    InvalidCredentials,
    ExpiredAccessToken,
    ExpiredOrRevokedSession,
    InvalidSignature,
    UnknownProvider,
    BadRequest,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidCredentials => "invalid_credentials",
            Self::ExpiredAccessToken => "expired_access_token",
            Self::ExpiredOrRevokedSession => "expired_or_revoked_session",
            Self::InvalidSignature => "invalid_signature",
            Self::UnknownProvider => "unknown_provider",
            Self::BadRequest => "bad_request",
            Self::Internal => "internal",
        }
    }
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated { .. } => ErrorKind::Unauthenticated,
            Self::InvalidCredentials(_) => ErrorKind::InvalidCredentials,
            Self::ExpiredAccessToken => ErrorKind::ExpiredAccessToken,
            Self::ExpiredOrRevokedSession => ErrorKind::ExpiredOrRevokedSession,
            Self::InvalidSignature => ErrorKind::InvalidSignature,
            Self::UnknownProvider(_) => ErrorKind::UnknownProvider,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Provider(_) | Self::Token(_) | Self::Store(_) | Self::Config(_) => ErrorKind::Internal,
        }
    }

    /// Whether this is an authentication failure (as opposed to a bad request or internal fault).
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::UnknownProvider | ErrorKind::BadRequest | ErrorKind::Internal
        )
    }
}
