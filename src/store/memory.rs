use std::collections::HashMap;

use parking_lot::Mutex;
use time::OffsetDateTime;

use super::{NewSession, PrincipalStore, StoreError};
use crate::types::{Identity, Principal, PrincipalId, PrincipalType, Session, SessionId};

/// In-process [`PrincipalStore`].
///
/// All tables sit behind one lock; each operation is one critical section.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    principals: HashMap<PrincipalId, PrincipalType>,
    // Keyed by (provider, id): the uniqueness constraint.
    identities: HashMap<(String, String), Identity>,
    sessions: HashMap<SessionId, Session>,
}

impl Tables {
    fn principal(&self, principal_id: PrincipalId) -> Option<Principal> {
        let principal_type = *self.principals.get(&principal_id)?;
        let mut identities: Vec<Identity> = self
            .identities
            .values()
            .filter(|identity| identity.principal_id == principal_id)
            .cloned()
            .collect();
        identities.sort_by(|a, b| (&a.provider, &a.id).cmp(&(&b.provider, &b.id)));
        Some(Principal {
            uuid: principal_id,
            principal_type,
            identities,
        })
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind another identity to an existing principal.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if `(provider, id)` is already bound.
    pub fn link_identity(
        &self,
        principal_id: PrincipalId,
        provider: &str,
        id: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.inner.lock();
        let key = (provider.to_owned(), id.to_owned());
        if tables.identities.contains_key(&key) {
            return Err(StoreError::Conflict(format!("identity {provider}:{id}")));
        }
        tables.identities.insert(
            key,
            Identity {
                id: id.to_owned(),
                provider: provider.to_owned(),
                principal_id,
            },
        );
        Ok(())
    }

    /// Number of principals, for tests and diagnostics.
    #[must_use]
    pub fn principal_count(&self) -> usize {
        self.inner.lock().principals.len()
    }
}

impl PrincipalStore for MemoryStore {
    async fn find_identity(&self, provider: &str, id: &str) -> Result<Option<Principal>, StoreError> {
        let tables = self.inner.lock();
        let owner = tables
            .identities
            .get(&(provider.to_owned(), id.to_owned()))
            .map(|identity| identity.principal_id);
        Ok(owner.and_then(|principal_id| tables.principal(principal_id)))
    }

    async fn find_principal(&self, principal_id: PrincipalId) -> Result<Option<Principal>, StoreError> {
        Ok(self.inner.lock().principal(principal_id))
    }

    async fn create_principal_and_identity(
        &self,
        principal_type: PrincipalType,
        provider: &str,
        id: &str,
    ) -> Result<Principal, StoreError> {
        let mut tables = self.inner.lock();
        let key = (provider.to_owned(), id.to_owned());
        if tables.identities.contains_key(&key) {
            return Err(StoreError::Conflict(format!("identity {provider}:{id}")));
        }
        let principal_id = PrincipalId::new_v4();
        let identity = Identity {
            id: id.to_owned(),
            provider: provider.to_owned(),
            principal_id,
        };
        tables.principals.insert(principal_id, principal_type);
        tables.identities.insert(key, identity.clone());
        Ok(Principal {
            uuid: principal_id,
            principal_type,
            identities: vec![identity],
        })
    }

    async fn create_session(&self, session: NewSession) -> Result<Session, StoreError> {
        let record = Session {
            uuid: SessionId::new_v4(),
            principal_id: session.principal_id,
            time_created: session.time_created,
            expiration_time: session.expiration_time,
            time_last_refreshed: None,
            refresh_count: 0,
            revoked: false,
        };
        self.inner.lock().sessions.insert(record.uuid, record.clone());
        Ok(record)
    }

    async fn find_session(&self, session_id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.inner.lock().sessions.get(&session_id).cloned())
    }

    async fn atomic_increment_refresh_count(
        &self,
        session_id: SessionId,
        refreshed_at: OffsetDateTime,
    ) -> Result<Option<Session>, StoreError> {
        let mut tables = self.inner.lock();
        let Some(session) = tables.sessions.get_mut(&session_id) else {
            return Ok(None);
        };
        if !session.is_refreshable_at(refreshed_at) {
            return Ok(None);
        }
        session.refresh_count += 1;
        session.time_last_refreshed = Some(refreshed_at);
        Ok(Some(session.clone()))
    }

    async fn set_revoked(&self, session_id: SessionId) -> Result<(), StoreError> {
        if let Some(session) = self.inner.lock().sessions.get_mut(&session_id) {
            session.revoked = true;
        }
        Ok(())
    }
}
