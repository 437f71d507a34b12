use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::config::AuthSettings;
use crate::error::Error;
use crate::store::{NewSession, PrincipalStore, StoreError};
use crate::token::{self, AccessClaims, RefreshClaims, SecretKeys, TokenError};
use crate::types::{Principal, PrincipalId, PrincipalType, SessionId};

/// Access + refresh token pair returned by login and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    pub access_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub refresh_token: String,
    /// Refresh token lifetime in seconds.
    pub refresh_token_expires_in: i64,
}

/// Session creation, sliding renewal and revocation.
///
/// Holds only immutable configuration; all session state lives in the store.
pub struct SessionManager<S> {
    store: Arc<S>,
    secret_keys: SecretKeys,
    access_token_max_age: Duration,
    refresh_token_max_age: Duration,
    session_max_age: Duration,
}

// Manual Clone: avoid derive adding `S: Clone` bound.
impl<S> Clone for SessionManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            secret_keys: self.secret_keys.clone(),
            access_token_max_age: self.access_token_max_age,
            refresh_token_max_age: self.refresh_token_max_age,
            session_max_age: self.session_max_age,
        }
    }
}

impl<S: PrincipalStore> SessionManager<S> {
    #[must_use]
    pub fn new(store: Arc<S>, settings: &AuthSettings) -> Self {
        Self {
            store,
            secret_keys: settings.secret_keys.clone(),
            access_token_max_age: settings.access_token_max_age,
            refresh_token_max_age: settings.refresh_token_max_age,
            session_max_age: settings.session_max_age,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Start a session for an externally authenticated identity.
    ///
    /// The first login of `(provider, external_id)` creates its Principal.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `session_max_age` overflows the expiration time.
    /// - [`Error::Store`] on store failure and [`Error::Token`] if signing fails.
    pub async fn create_session(&self, provider: &str, external_id: &str) -> Result<TokenBundle, Error> {
        let now = OffsetDateTime::now_utc();
        let expiration_time = now
            .checked_add(self.session_max_age)
            .ok_or_else(|| Error::Config("session_max_age is out of range".into()))?;
        let principal = self.find_or_create_principal(provider, external_id).await?;
        let session = self
            .store
            .create_session(NewSession {
                principal_id: principal.uuid,
                time_created: now,
                expiration_time,
            })
            .await?;

        tracing::info!(
            session_id = %session.uuid,
            principal_id = %principal.uuid,
            provider,
            "session created"
        );
        self.issue(&principal, session.uuid)
    }

    /// Exchange a refresh token for a fresh token pair on the same session.
    ///
    /// The session's own `expiration_time` is left unchanged: a session has a
    /// fixed absolute lifetime however often it is refreshed.
    ///
    /// # Errors
    ///
    /// - [`Error::ExpiredOrRevokedSession`] if the refresh token is expired, or
    ///   its session is missing, revoked or past its expiration time. The
    ///   error is the same in every case.
    /// - [`Error::InvalidSignature`] if the refresh token does not verify.
    pub async fn slide_session(&self, refresh_token: &str) -> Result<TokenBundle, Error> {
        let signed = token::decode::<RefreshClaims>(refresh_token, &self.secret_keys).map_err(|e| match e {
            TokenError::ExpiredSignature => Error::ExpiredOrRevokedSession,
            other => {
                tracing::debug!(error = %other, "refresh token rejected");
                Error::InvalidSignature
            }
        })?;
        let session_id = signed
            .claims
            .session_id()
            .map_err(|_| Error::InvalidSignature)?;

        let now = OffsetDateTime::now_utc();
        match self.store.find_session(session_id).await? {
            Some(session) if session.is_refreshable_at(now) => {}
            _ => return Err(self.refusal(session_id)),
        }

        // The increment re-checks refreshability store-side, so a revocation
        // racing this refresh cannot be overwritten.
        let Some(session) = self
            .store
            .atomic_increment_refresh_count(session_id, now)
            .await?
        else {
            return Err(self.refusal(session_id));
        };

        let Some(principal) = self.store.find_principal(session.principal_id).await? else {
            return Err(self.refusal(session_id));
        };

        tracing::info!(
            session_id = %session_id,
            refresh_count = session.refresh_count,
            "session refreshed"
        );
        self.issue(&principal, session_id)
    }

    /// Mark a session revoked so it can never be refreshed again.
    ///
    /// Revoking an unknown or already-revoked session succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] on store failure.
    pub async fn revoke_session(&self, session_id: SessionId) -> Result<(), Error> {
        self.store.set_revoked(session_id).await?;
        tracing::info!(session_id = %session_id, "session revoked");
        Ok(())
    }

    /// Store view of a principal, including identities added since its token was issued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] on store failure.
    pub async fn principal(&self, principal_id: PrincipalId) -> Result<Option<Principal>, Error> {
        Ok(self.store.find_principal(principal_id).await?)
    }

    async fn find_or_create_principal(&self, provider: &str, external_id: &str) -> Result<Principal, Error> {
        if let Some(principal) = self.store.find_identity(provider, external_id).await? {
            return Ok(principal);
        }
        match self
            .store
            .create_principal_and_identity(PrincipalType::User, provider, external_id)
            .await
        {
            Ok(principal) => {
                tracing::info!(principal_id = %principal.uuid, provider, "principal created");
                Ok(principal)
            }
            // Lost a race with a concurrent first login: the winner's row is there now.
            Err(StoreError::Conflict(_)) => {
                tracing::debug!(provider, "identity created concurrently; retrying as lookup");
                self.store
                    .find_identity(provider, external_id)
                    .await?
                    .ok_or_else(|| {
                        Error::Store(StoreError::Conflict(format!(
                            "identity {provider}:{external_id} conflicted but is not readable"
                        )))
                    })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn issue(&self, principal: &Principal, session_id: SessionId) -> Result<TokenBundle, Error> {
        let key = self.secret_keys.current();
        let access_token = token::encode(
            AccessClaims::for_principal(principal),
            key,
            self.access_token_max_age,
        )?;
        let refresh_token = token::encode(
            RefreshClaims::for_session(session_id),
            key,
            self.refresh_token_max_age,
        )?;
        Ok(TokenBundle {
            access_token,
            token_type: "bearer".into(),
            expires_in: self.access_token_max_age.whole_seconds(),
            refresh_token,
            refresh_token_expires_in: self.refresh_token_max_age.whole_seconds(),
        })
    }

    fn refusal(&self, session_id: SessionId) -> Error {
        tracing::info!(session_id = %session_id, "refresh refused");
        Error::ExpiredOrRevokedSession
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{AccessMode, AuthorizationGate, PresentedCredentials};
    use crate::store::MemoryStore;
    use crate::token::SecretKey;
    use crate::types::{CurrentPrincipal, Session};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn settings() -> AuthSettings {
        AuthSettings::new(SecretKeys::new(vec![SecretKey::new("current"), SecretKey::new("retired")]).unwrap())
    }

    fn manager(settings: &AuthSettings) -> SessionManager<MemoryStore> {
        SessionManager::new(Arc::new(MemoryStore::new()), settings)
    }

    fn session_of(bundle: &TokenBundle, keys: &SecretKeys) -> SessionId {
        token::decode::<RefreshClaims>(&bundle.refresh_token, keys)
            .unwrap()
            .claims
            .session_id()
            .unwrap()
    }

    async fn stored(manager: &SessionManager<MemoryStore>, bundle: &TokenBundle) -> Session {
        let id = session_of(bundle, &manager.secret_keys);
        manager.store().find_session(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn created_access_token_resolves_to_same_principal() {
        let settings = settings();
        let manager = manager(&settings);
        let gate = AuthorizationGate::new(&settings, AccessMode::ExternalProviders { providers: vec!["toy".into()] });

        let bundle = manager.create_session("toy", "alice").await.unwrap();
        assert_eq!(bundle.token_type, "bearer");
        assert_eq!(bundle.expires_in, 15 * 60);
        assert_eq!(bundle.refresh_token_expires_in, 7 * 24 * 60 * 60);

        let stored = manager.store().find_identity("toy", "alice").await.unwrap().unwrap();
        let credentials = PresentedCredentials {
            authorization: Some(format!("Bearer {}", bundle.access_token)),
            ..Default::default()
        };
        match gate.resolve(&credentials, "http://x/").unwrap().principal {
            CurrentPrincipal::Authenticated(principal) => {
                assert_eq!(principal.uuid, stored.uuid);
                assert_eq!(principal.identities.len(), 1);
                assert_eq!(principal.identities[0].provider, "toy");
            }
            other => panic!("expected an authenticated principal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_login_reuses_principal_with_new_session() {
        let manager = manager(&settings());

        let first = manager.create_session("toy", "alice").await.unwrap();
        let second = manager.create_session("toy", "alice").await.unwrap();

        let a = stored(&manager, &first).await;
        let b = stored(&manager, &second).await;
        assert_ne!(a.uuid, b.uuid);
        assert_eq!(a.principal_id, b.principal_id);
        assert_eq!(manager.store().principal_count(), 1);
        assert_eq!(a.refresh_count, 0);
        assert!(!a.revoked);
    }

    #[tokio::test]
    async fn slide_keeps_session_and_counts_refresh() {
        let manager = manager(&settings());
        let bundle = manager.create_session("toy", "alice").await.unwrap();
        let before = stored(&manager, &bundle).await;

        let slid = manager.slide_session(&bundle.refresh_token).await.unwrap();
        assert_eq!(session_of(&slid, &manager.secret_keys), before.uuid);

        let after = stored(&manager, &slid).await;
        assert_eq!(after.refresh_count, before.refresh_count + 1);
        assert!(after.time_last_refreshed.is_some());
        assert_eq!(after.expiration_time, before.expiration_time);
    }

    #[tokio::test]
    async fn refreshed_access_token_picks_up_new_identities() {
        let manager = manager(&settings());
        let bundle = manager.create_session("toy", "alice").await.unwrap();
        let principal = manager.store().find_identity("toy", "alice").await.unwrap().unwrap();
        manager.store().link_identity(principal.uuid, "orcid", "0000-0001").unwrap();

        let slid = manager.slide_session(&bundle.refresh_token).await.unwrap();
        let claims = token::decode::<AccessClaims>(&slid.access_token, &manager.secret_keys).unwrap();
        assert_eq!(claims.claims.ids.len(), 2);
    }

    #[tokio::test]
    async fn revoked_and_expired_sessions_fail_identically() {
        let settings = settings();
        let live = manager(&settings);
        let revoked_bundle = live.create_session("toy", "alice").await.unwrap();
        live.revoke_session(session_of(&revoked_bundle, &live.secret_keys)).await.unwrap();

        let short = manager(&settings.clone().with_session_max_age(Duration::seconds(-1)));
        let expired_bundle = short.create_session("toy", "bob").await.unwrap();

        let revoked = live.slide_session(&revoked_bundle.refresh_token).await.unwrap_err();
        let expired = short.slide_session(&expired_bundle.refresh_token).await.unwrap_err();
        assert_eq!(revoked.kind(), expired.kind());
        assert_eq!(revoked.to_string(), expired.to_string());
        assert!(matches!(revoked, Error::ExpiredOrRevokedSession));
    }

    #[tokio::test]
    async fn unknown_session_fails_like_revoked() {
        let manager = manager(&settings());
        let orphan = token::encode(
            RefreshClaims::for_session(SessionId::new_v4()),
            manager.secret_keys.current(),
            Duration::minutes(5),
        )
        .unwrap();

        let err = manager.slide_session(&orphan).await.unwrap_err();
        assert!(matches!(err, Error::ExpiredOrRevokedSession));
    }

    #[tokio::test]
    async fn expired_refresh_token_requires_reauthentication() {
        let manager = manager(&settings().with_refresh_token_max_age(Duration::seconds(-30)));
        let bundle = manager.create_session("toy", "alice").await.unwrap();

        let err = manager.slide_session(&bundle.refresh_token).await.unwrap_err();
        assert!(matches!(err, Error::ExpiredOrRevokedSession));
    }

    #[tokio::test]
    async fn forged_or_misused_refresh_tokens_are_invalid() {
        let manager = manager(&settings());
        let bundle = manager.create_session("toy", "alice").await.unwrap();

        assert!(matches!(
            manager.slide_session(&bundle.access_token).await,
            Err(Error::InvalidSignature)
        ));
        let forged = token::encode(
            RefreshClaims::for_session(session_of(&bundle, &manager.secret_keys)),
            &SecretKey::new("attacker"),
            Duration::minutes(5),
        )
        .unwrap();
        assert!(matches!(
            manager.slide_session(&forged).await,
            Err(Error::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn refresh_token_from_retained_key_still_slides() {
        let settings = settings();
        let manager = manager(&settings);
        let bundle = manager.create_session("toy", "alice").await.unwrap();
        let session_id = session_of(&bundle, &manager.secret_keys);

        let old = token::encode(
            RefreshClaims::for_session(session_id),
            &SecretKey::new("retired"),
            Duration::minutes(5),
        )
        .unwrap();
        assert!(manager.slide_session(&old).await.is_ok());
    }

    #[tokio::test]
    async fn revoke_is_idempotent_and_tolerates_unknown_ids() {
        let manager = manager(&settings());
        let bundle = manager.create_session("toy", "alice").await.unwrap();
        let session_id = session_of(&bundle, &manager.secret_keys);

        manager.revoke_session(session_id).await.unwrap();
        manager.revoke_session(session_id).await.unwrap();
        manager.revoke_session(SessionId::new_v4()).await.unwrap();
        assert!(stored(&manager, &bundle).await.revoked);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_slides_lose_no_updates() {
        const N: u64 = 32;
        let manager = manager(&settings());
        let bundle = manager.create_session("toy", "alice").await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..N {
            let manager = manager.clone();
            let refresh_token = bundle.refresh_token.clone();
            tasks.spawn(async move { manager.slide_session(&refresh_token).await });
        }
        while let Some(result) = tasks.join_next().await {
            assert!(result.unwrap().is_ok());
        }

        assert_eq!(stored(&manager, &bundle).await.refresh_count, N);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_logins_create_one_principal() {
        const N: usize = 16;
        let manager = manager(&settings());

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..N {
            let manager = manager.clone();
            tasks.spawn(async move { manager.create_session("toy", "new").await });
        }
        let mut sessions = std::collections::HashSet::new();
        while let Some(result) = tasks.join_next().await {
            let bundle = result.unwrap().unwrap();
            sessions.insert(session_of(&bundle, &manager.secret_keys));
        }

        assert_eq!(manager.store().principal_count(), 1);
        assert_eq!(sessions.len(), N);
    }

    #[tokio::test]
    async fn overflowing_session_lifetime_fails_without_side_effects() {
        let manager = manager(&settings().with_session_max_age(Duration::seconds(i64::MAX / 2)));

        let err = manager.create_session("toy", "alice").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(manager.store().principal_count(), 0);
    }

    #[tokio::test]
    async fn overflowing_token_lifetime_is_an_error() {
        let manager = manager(&settings().with_access_token_max_age(Duration::seconds(i64::MAX / 2)));

        let err = manager.create_session("toy", "alice").await.unwrap_err();
        assert!(matches!(err, Error::Token(TokenError::LifetimeOutOfRange)));
    }

    /// Store whose first identity lookup misses, as if another login won the race.
    struct RacingStore {
        inner: MemoryStore,
        missed: AtomicBool,
    }

    impl PrincipalStore for RacingStore {
        async fn find_identity(&self, provider: &str, id: &str) -> Result<Option<Principal>, StoreError> {
            if !self.missed.swap(true, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.find_identity(provider, id).await
        }

        async fn find_principal(&self, principal_id: PrincipalId) -> Result<Option<Principal>, StoreError> {
            self.inner.find_principal(principal_id).await
        }

        async fn create_principal_and_identity(
            &self,
            principal_type: PrincipalType,
            provider: &str,
            id: &str,
        ) -> Result<Principal, StoreError> {
            self.inner.create_principal_and_identity(principal_type, provider, id).await
        }

        async fn create_session(&self, session: NewSession) -> Result<Session, StoreError> {
            self.inner.create_session(session).await
        }

        async fn find_session(&self, session_id: SessionId) -> Result<Option<Session>, StoreError> {
            self.inner.find_session(session_id).await
        }

        async fn atomic_increment_refresh_count(
            &self,
            session_id: SessionId,
            refreshed_at: OffsetDateTime,
        ) -> Result<Option<Session>, StoreError> {
            self.inner.atomic_increment_refresh_count(session_id, refreshed_at).await
        }

        async fn set_revoked(&self, session_id: SessionId) -> Result<(), StoreError> {
            self.inner.set_revoked(session_id).await
        }
    }

    #[tokio::test]
    async fn losing_first_login_race_reuses_winner() {
        let inner = MemoryStore::new();
        let winner = inner
            .create_principal_and_identity(PrincipalType::User, "toy", "alice")
            .await
            .unwrap();
        let store = Arc::new(RacingStore { inner, missed: AtomicBool::new(false) });
        let manager = SessionManager::new(store.clone(), &settings());

        let bundle = manager.create_session("toy", "alice").await.unwrap();
        let claims = token::decode::<AccessClaims>(&bundle.access_token, &manager.secret_keys).unwrap();
        assert_eq!(claims.claims.sub, winner.uuid.to_string());
        assert_eq!(store.inner.principal_count(), 1);
    }
}
