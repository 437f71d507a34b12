use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use time::{Duration, OffsetDateTime};

use crate::error::Error;
use crate::types::{Identity, Principal, PrincipalId, PrincipalType, SessionId};

/// Symmetric HMAC-SHA256 secret.
#[derive(Clone)]
pub struct SecretKey(String);

impl SecretKey {
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Random 32-byte key, hex encoded.
    #[must_use]
    pub fn generate() -> Self {
        let random_bytes: [u8; 32] = rand::rng().random();
        Self(hex::encode(random_bytes))
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Ordered signing keys. The first key encodes; every key decodes.
///
/// Keeping a retired key at the tail keeps its tokens valid for the
/// rotation window while only the newest key issues new tokens.
#[derive(Debug, Clone)]
pub struct SecretKeys {
    keys: Vec<SecretKey>,
}

impl SecretKeys {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `keys` is empty.
    pub fn new(keys: Vec<SecretKey>) -> Result<Self, Error> {
        if keys.is_empty() {
            return Err(Error::Config("at least one secret key is required".into()));
        }
        Ok(Self { keys })
    }

    /// A single random key. Tokens signed with it do not survive a restart.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            keys: vec![SecretKey::generate()],
        }
    }

    /// The key used for encoding.
    #[must_use]
    pub fn current(&self) -> &SecretKey {
        &self.keys[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &SecretKey> {
        self.keys.iter()
    }
}

/// Token failure as seen by the codec.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Signature verified but the token is past `exp`.
    #[error("signature has expired")]
    ExpiredSignature,

    /// No configured key verified the token.
    #[error("signature verification failed")]
    InvalidSignature,

    /// Signature verified but the claims are not what the caller expected.
    #[error("malformed claims: {0}")]
    Malformed(String),

    /// `now + ttl` is not a representable time.
    #[error("token lifetime out of range")]
    LifetimeOutOfRange,

    #[error("encoding failed: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Access => f.write_str("access"),
            Self::Refresh => f.write_str("refresh"),
        }
    }
}

/// A claim body that can travel inside a signed token.
pub trait Claims: Serialize + DeserializeOwned {
    const TOKEN_TYPE: TokenType;
}

/// Identity entry of an access token (`{id, idp}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaim {
    pub id: String,
    pub idp: String,
}

/// Access token body: enough of the identity graph to authorize without a store hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub sub_typ: PrincipalType,
    pub ids: Vec<IdentityClaim>,
}

impl Claims for AccessClaims {
    const TOKEN_TYPE: TokenType = TokenType::Access;
}

impl AccessClaims {
    #[must_use]
    pub fn for_principal(principal: &Principal) -> Self {
        Self {
            sub: principal.uuid.to_string(),
            sub_typ: principal.principal_type,
            ids: principal
                .identities
                .iter()
                .map(|identity| IdentityClaim {
                    id: identity.id.clone(),
                    idp: identity.provider.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild an ephemeral Principal from the claims.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Malformed`] if `sub` is not a UUID.
    pub fn into_principal(self) -> Result<Principal, TokenError> {
        let uuid: PrincipalId = self
            .sub
            .parse()
            .map_err(|_| TokenError::Malformed("sub is not a uuid".into()))?;
        let identities = self
            .ids
            .into_iter()
            .map(|claim| Identity {
                id: claim.id,
                provider: claim.idp,
                principal_id: uuid,
            })
            .collect();
        Ok(Principal {
            uuid,
            principal_type: self.sub_typ,
            identities,
        })
    }
}

/// Refresh token body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sid: String,
}

impl Claims for RefreshClaims {
    const TOKEN_TYPE: TokenType = TokenType::Refresh;
}

impl RefreshClaims {
    #[must_use]
    pub fn for_session(session_id: SessionId) -> Self {
        Self {
            sid: session_id.to_string(),
        }
    }

    /// # Errors
    ///
    /// Returns [`TokenError::Malformed`] if `sid` is not a UUID.
    pub fn session_id(&self) -> Result<SessionId, TokenError> {
        self.sid
            .parse()
            .map_err(|_| TokenError::Malformed("sid is not a uuid".into()))
    }
}

/// Claim body plus the expiry and type tag added at encoding time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedClaims<C> {
    #[serde(flatten)]
    pub claims: C,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

/// Sign `claims` with `key`, expiring `ttl` from now.
///
/// # Errors
///
/// - [`TokenError::LifetimeOutOfRange`] if `ttl` overflows the expiry time.
/// - [`TokenError::Encode`] if serialization or signing fails.
pub fn encode<C: Claims>(claims: C, key: &SecretKey, ttl: Duration) -> Result<String, TokenError> {
    let expires_at = OffsetDateTime::now_utc()
        .checked_add(ttl)
        .ok_or(TokenError::LifetimeOutOfRange)?;
    let signed = SignedClaims {
        claims,
        exp: expires_at.unix_timestamp(),
        token_type: C::TOKEN_TYPE,
    };
    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &signed,
        &EncodingKey::from_secret(key.as_bytes()),
    )?;
    Ok(token)
}

/// Verify `token` against `keys` in order; the first key that verifies wins.
///
/// An expired token is reported as soon as a key verifies its signature and is
/// never retried against the remaining keys. The type tag is checked before
/// expiry, so a token of the wrong kind is `Malformed` even when expired.
///
/// # Errors
///
/// - [`TokenError::ExpiredSignature`] if a key verifies it but `exp` has passed.
/// - [`TokenError::InvalidSignature`] if no key verifies it.
/// - [`TokenError::Malformed`] if it verifies but is not a `C` token.
pub fn decode<C: Claims>(token: &str, keys: &SecretKeys) -> Result<SignedClaims<C>, TokenError> {
    let validation = validation();
    for key in keys.iter() {
        match jsonwebtoken::decode::<Map<String, JsonValue>>(
            token,
            &DecodingKey::from_secret(key.as_bytes()),
            &validation,
        ) {
            Ok(data) => {
                let signed = parse_claims::<C>(data.claims)?;
                if signed.exp < OffsetDateTime::now_utc().unix_timestamp() {
                    return Err(TokenError::ExpiredSignature);
                }
                return Ok(signed);
            }
            // Try the next key in the rotation.
            Err(_) => continue,
        }
    }
    Err(TokenError::InvalidSignature)
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    // Expiry is checked after the type tag, with zero leeway; `exp` must still be present.
    validation.leeway = 0;
    validation.validate_exp = false;
    validation.set_required_spec_claims(&["exp"]);
    validation
}

fn parse_claims<C: Claims>(raw: Map<String, JsonValue>) -> Result<SignedClaims<C>, TokenError> {
    let tagged = raw
        .get("type")
        .and_then(|v| TokenType::deserialize(v).ok());
    if tagged != Some(C::TOKEN_TYPE) {
        return Err(TokenError::Malformed(format!(
            "expected {} token",
            C::TOKEN_TYPE
        )));
    }
    serde_json::from_value(JsonValue::Object(raw)).map_err(|e| TokenError::Malformed(e.to_string()))
}
