//! Per-request principal resolution.
//!
//! The gate turns raw credential material into a [`CurrentPrincipal`] using
//! only immutable configuration: steady-state authorization never touches
//! the store.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::config::AuthSettings;
use crate::error::Error;
use crate::token::{self, AccessClaims, SecretKeys, TokenError};
use crate::types::CurrentPrincipal;

/// Static API key for single-user deployments.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Random 32-byte key, base64url encoded.
    #[must_use]
    pub fn generate() -> Self {
        let random_bytes: [u8; 32] = rand::rng().random();
        Self(URL_SAFE_NO_PAD.encode(random_bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a presented key.
    ///
    /// Both sides are hashed first so the comparison length does not depend
    /// on the candidate.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        let expected = Sha256::digest(self.0.as_bytes());
        let presented = Sha256::digest(candidate.as_bytes());
        expected
            .iter()
            .zip(presented.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(..)")
    }
}

/// How this deployment authenticates, fixed at startup.
#[derive(Debug, Clone)]
pub enum AccessMode {
    /// No identity providers; a static API key resolves to [`CurrentPrincipal::Admin`].
    SingleUser { api_key: ApiKey },
    /// Logins go through the named identity providers.
    ExternalProviders { providers: Vec<String> },
}

/// Credential material carried by one request.
#[derive(Debug, Clone, Default)]
pub struct PresentedCredentials {
    pub api_key_query: Option<String>,
    pub api_key_header: Option<String>,
    pub api_key_cookie: Option<String>,
    pub access_token_cookie: Option<String>,
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
}

impl PresentedCredentials {
    /// First presented API key, in query, header, cookie order.
    fn api_key(&self) -> Option<(&str, bool)> {
        self.api_key_query
            .as_deref()
            .map(|k| (k, false))
            .or_else(|| self.api_key_header.as_deref().map(|k| (k, false)))
            .or_else(|| self.api_key_cookie.as_deref().map(|k| (k, true)))
    }

    /// Bearer token, cookie first then `Authorization` header.
    fn bearer_token(&self) -> Option<&str> {
        self.access_token_cookie
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.authorization.as_deref().and_then(parse_bearer))
    }
}

fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub principal: CurrentPrincipal,
    /// Set when the response should store the single-user API key as a cookie.
    pub api_key_cookie: Option<ApiKey>,
}

impl Resolution {
    fn without_cookie(principal: CurrentPrincipal) -> Self {
        Self {
            principal,
            api_key_cookie: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthorizationGate {
    secret_keys: SecretKeys,
    mode: AccessMode,
    allow_anonymous_access: bool,
}

impl AuthorizationGate {
    #[must_use]
    pub fn new(settings: &AuthSettings, mode: AccessMode) -> Self {
        Self {
            secret_keys: settings.secret_keys.clone(),
            mode,
            allow_anonymous_access: settings.allow_anonymous_access,
        }
    }

    #[must_use]
    pub fn mode(&self) -> &AccessMode {
        &self.mode
    }

    /// Resolve the principal behind `credentials`.
    ///
    /// `discovery_url` is attached to [`Error::Unauthenticated`] so a client can
    /// find the available identity providers.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidCredentials`] for a wrong single-user API key.
    /// - [`Error::Unauthenticated`] when nothing is presented and anonymous access is off.
    /// - [`Error::ExpiredAccessToken`] for a genuine but expired access token.
    /// - [`Error::InvalidSignature`] for anything else that fails to verify.
    pub fn resolve(
        &self,
        credentials: &PresentedCredentials,
        discovery_url: &str,
    ) -> Result<Resolution, Error> {
        if let AccessMode::SingleUser { api_key } = &self.mode {
            if let Some((presented, from_cookie)) = credentials.api_key() {
                if !api_key.matches(presented) {
                    tracing::debug!("rejected single-user API key");
                    return Err(Error::InvalidCredentials("Invalid API key".into()));
                }
                return Ok(Resolution {
                    principal: CurrentPrincipal::Admin,
                    api_key_cookie: (!from_cookie).then(|| api_key.clone()),
                });
            }
        }

        let Some(token) = credentials.bearer_token() else {
            if self.allow_anonymous_access {
                return Ok(Resolution::without_cookie(CurrentPrincipal::Public));
            }
            return Err(Error::Unauthenticated {
                discovery_url: discovery_url.to_owned(),
            });
        };

        let signed = token::decode::<AccessClaims>(token, &self.secret_keys).map_err(|e| match e {
            TokenError::ExpiredSignature => Error::ExpiredAccessToken,
            other => {
                tracing::debug!(error = %other, "access token rejected");
                Error::InvalidSignature
            }
        })?;
        let principal = signed
            .claims
            .into_principal()
            .map_err(|_| Error::InvalidSignature)?;

        Ok(Resolution::without_cookie(CurrentPrincipal::Authenticated(principal)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{RefreshClaims, SecretKey};
    use crate::types::{Identity, Principal, PrincipalId, PrincipalType, SessionId};
    use time::Duration;

    const ROOT: &str = "http://localhost:8000/api/v1/";

    fn settings() -> AuthSettings {
        AuthSettings::new(SecretKeys::new(vec![SecretKey::new("k1"), SecretKey::new("k0")]).unwrap())
    }

    fn single_user(settings: &AuthSettings) -> AuthorizationGate {
        AuthorizationGate::new(
            settings,
            AccessMode::SingleUser {
                api_key: ApiKey::new("letmein"),
            },
        )
    }

    fn external(settings: &AuthSettings) -> AuthorizationGate {
        AuthorizationGate::new(
            settings,
            AccessMode::ExternalProviders {
                providers: vec!["toy".into()],
            },
        )
    }

    fn principal() -> Principal {
        let uuid = PrincipalId::new_v4();
        Principal {
            uuid,
            principal_type: PrincipalType::User,
            identities: vec![Identity { id: "alice".into(), provider: "toy".into(), principal_id: uuid }],
        }
    }

    fn access_token(principal: &Principal, key: &str, ttl: Duration) -> String {
        token::encode(AccessClaims::for_principal(principal), &SecretKey::new(key), ttl).unwrap()
    }

    #[test]
    fn api_key_via_query_resolves_admin_and_schedules_cookie() {
        let gate = single_user(&settings());
        let credentials = PresentedCredentials {
            api_key_query: Some("letmein".into()),
            ..Default::default()
        };

        let resolution = gate.resolve(&credentials, ROOT).unwrap();
        assert_eq!(resolution.principal, CurrentPrincipal::Admin);
        assert_eq!(resolution.api_key_cookie.unwrap().as_str(), "letmein");
    }

    #[test]
    fn api_key_via_cookie_does_not_reschedule_cookie() {
        let gate = single_user(&settings());
        let credentials = PresentedCredentials {
            api_key_cookie: Some("letmein".into()),
            ..Default::default()
        };

        let resolution = gate.resolve(&credentials, ROOT).unwrap();
        assert_eq!(resolution.principal, CurrentPrincipal::Admin);
        assert!(resolution.api_key_cookie.is_none());
    }

    #[test]
    fn wrong_api_key_is_invalid_credentials() {
        let gate = single_user(&settings());
        let credentials = PresentedCredentials {
            api_key_header: Some("guess".into()),
            ..Default::default()
        };

        let err = gate.resolve(&credentials, ROOT).unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)));
        assert_eq!(err.to_string(), "Invalid API key");
    }

    #[test]
    fn api_key_is_ignored_with_external_providers() {
        let gate = external(&settings());
        let credentials = PresentedCredentials {
            api_key_query: Some("letmein".into()),
            ..Default::default()
        };
        assert!(matches!(
            gate.resolve(&credentials, ROOT),
            Err(Error::Unauthenticated { .. })
        ));
    }

    #[test]
    fn no_token_with_anonymous_access_is_public() {
        let gate = external(&settings().with_allow_anonymous_access(true));
        let resolution = gate.resolve(&PresentedCredentials::default(), ROOT).unwrap();
        assert_eq!(resolution.principal, CurrentPrincipal::Public);
    }

    #[test]
    fn no_token_without_anonymous_access_carries_discovery_hint() {
        let gate = external(&settings());
        match gate.resolve(&PresentedCredentials::default(), ROOT) {
            Err(Error::Unauthenticated { discovery_url }) => assert_eq!(discovery_url, ROOT),
            other => panic!("expected Unauthenticated, got {other:?}"),
        }
    }

    #[test]
    fn valid_bearer_token_resolves_without_store() {
        let gate = external(&settings());
        let principal = principal();
        let credentials = PresentedCredentials {
            authorization: Some(format!("Bearer {}", access_token(&principal, "k1", Duration::minutes(5)))),
            ..Default::default()
        };

        let resolution = gate.resolve(&credentials, ROOT).unwrap();
        assert_eq!(resolution.principal, CurrentPrincipal::Authenticated(principal));
    }

    #[test]
    fn token_signed_with_retained_key_resolves() {
        let gate = external(&settings());
        let principal = principal();
        let credentials = PresentedCredentials {
            access_token_cookie: Some(access_token(&principal, "k0", Duration::minutes(5))),
            ..Default::default()
        };
        assert!(gate.resolve(&credentials, ROOT).is_ok());
    }

    #[test]
    fn cookie_takes_precedence_over_header() {
        let gate = external(&settings());
        let in_cookie = principal();
        let in_header = principal();
        let credentials = PresentedCredentials {
            access_token_cookie: Some(access_token(&in_cookie, "k1", Duration::minutes(5))),
            authorization: Some(format!("Bearer {}", access_token(&in_header, "k1", Duration::minutes(5)))),
            ..Default::default()
        };

        let resolved = gate.resolve(&credentials, ROOT).unwrap().principal;
        assert_eq!(resolved.principal().unwrap().uuid, in_cookie.uuid);
    }

    #[test]
    fn expired_access_token_asks_for_refresh() {
        let gate = external(&settings());
        let credentials = PresentedCredentials {
            authorization: Some(format!("Bearer {}", access_token(&principal(), "k1", Duration::seconds(-30)))),
            ..Default::default()
        };

        let err = gate.resolve(&credentials, ROOT).unwrap_err();
        assert!(matches!(err, Error::ExpiredAccessToken));
    }

    #[test]
    fn foreign_or_wrong_type_tokens_are_invalid() {
        let gate = external(&settings());

        let forged = PresentedCredentials {
            authorization: Some(format!("Bearer {}", access_token(&principal(), "elsewhere", Duration::minutes(5)))),
            ..Default::default()
        };
        assert!(matches!(gate.resolve(&forged, ROOT), Err(Error::InvalidSignature)));

        let refresh = token::encode(
            RefreshClaims::for_session(SessionId::new_v4()),
            &SecretKey::new("k1"),
            Duration::minutes(5),
        )
        .unwrap();
        let wrong_type = PresentedCredentials {
            authorization: Some(format!("Bearer {refresh}")),
            ..Default::default()
        };
        assert!(matches!(gate.resolve(&wrong_type, ROOT), Err(Error::InvalidSignature)));
    }

    #[test]
    fn expired_refresh_token_as_bearer_is_invalid_not_expired() {
        let gate = external(&settings());
        let refresh = token::encode(
            RefreshClaims::for_session(SessionId::new_v4()),
            &SecretKey::new("k1"),
            Duration::seconds(-30),
        )
        .unwrap();
        let credentials = PresentedCredentials {
            authorization: Some(format!("Bearer {refresh}")),
            ..Default::default()
        };
        assert!(matches!(gate.resolve(&credentials, ROOT), Err(Error::InvalidSignature)));
    }

    #[test]
    fn non_bearer_authorization_counts_as_absent() {
        let gate = external(&settings().with_allow_anonymous_access(true));
        let credentials = PresentedCredentials {
            authorization: Some("Basic dXNlcjpwYXNz".into()),
            ..Default::default()
        };
        let resolution = gate.resolve(&credentials, ROOT).unwrap();
        assert_eq!(resolution.principal, CurrentPrincipal::Public);
    }

    #[test]
    fn api_key_comparison() {
        let key = ApiKey::new("letmein");
        assert!(key.matches("letmein"));
        assert!(!key.matches("letmei"));
        assert!(!key.matches(""));
        assert_ne!(ApiKey::generate().as_str(), ApiKey::generate().as_str());
        assert!(!format!("{key:?}").contains("letmein"));
    }
}
