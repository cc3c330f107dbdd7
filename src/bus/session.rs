//! Sessions behind connections and the store that resolves them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::store::StoreError;
use crate::error::{Error, Result};

/// Maximum number of `next_sid` hops followed when resolving a session.
pub const MAX_SESSION_HOPS: usize = 8;

/// A user session as known by the session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub sid: String,
    /// Authenticated user, `None` for anonymous sessions.
    pub uid: Option<i64>,
    /// Database the session is bound to.
    pub db: Option<String>,
    /// Set when the session was rotated; points at its successor.
    pub next_sid: Option<String>,
}

impl Session {
    pub fn new(sid: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            uid: None,
            db: None,
            next_sid: None,
        }
    }

    /// A fresh anonymous session with a random id.
    pub fn anonymous() -> Self {
        Self::new(Uuid::new_v4().simple().to_string())
    }

    #[must_use]
    pub fn with_uid(mut self, uid: i64) -> Self {
        self.uid = Some(uid);
        self
    }

    #[must_use]
    pub fn with_db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }
}

/// Identity store consulted by connections.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Look a session up by id.
    async fn get(&self, sid: &str) -> std::result::Result<Option<Session>, StoreError>;

    /// Whether an authenticated session is still valid (not logged out, no
    /// password change since it was issued...).
    async fn check(&self, session: &Session) -> std::result::Result<bool, StoreError>;

    /// Create and persist a fresh anonymous session bound to `db`.
    async fn create_anonymous(
        &self,
        db: Option<String>,
    ) -> std::result::Result<Session, StoreError>;
}

/// Resolve `sid` to a live session, following rotations.
///
/// # Errors
///
/// - `Error::SessionExpired` if a session in the chain is gone, the chain is
///   longer than [`MAX_SESSION_HOPS`], or an authenticated session fails its
///   liveness check
/// - `Error::Store` if the store fails
pub async fn resolve(store: &dyn SessionStore, sid: &str) -> Result<Session> {
    let mut sid = sid.to_owned();
    for _ in 0..=MAX_SESSION_HOPS {
        let session = store.get(&sid).await?.ok_or(Error::SessionExpired)?;
        match session.next_sid {
            Some(next) => sid = next,
            None => {
                if session.uid.is_some() && !store.check(&session).await? {
                    return Err(Error::SessionExpired);
                }
                return Ok(session);
            }
        }
    }
    tracing::warn!(sid = %sid, "session rotation chain too long");
    Err(Error::SessionExpired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemorySessionStore;

    #[tokio::test]
    async fn test_resolve_plain() {
        let store = MemorySessionStore::new();
        store.insert(Session::new("a").with_uid(2));
        let session = resolve(&store, "a").await.unwrap();
        assert_eq!(session.uid, Some(2));
    }

    #[tokio::test]
    async fn test_resolve_follows_rotation() {
        let store = MemorySessionStore::new();
        store.insert(Session::new("new").with_uid(2));
        store.rotate("old", "new");
        let session = resolve(&store, "old").await.unwrap();
        assert_eq!(session.sid, "new");
    }

    #[tokio::test]
    async fn test_resolve_missing() {
        let store = MemorySessionStore::new();
        assert_eq!(resolve(&store, "nope").await, Err(Error::SessionExpired));
    }

    #[tokio::test]
    async fn test_resolve_invalidated() {
        let store = MemorySessionStore::new();
        store.insert(Session::new("a").with_uid(2));
        store.invalidate("a");
        assert_eq!(resolve(&store, "a").await, Err(Error::SessionExpired));
    }

    #[tokio::test]
    async fn test_anonymous_session_skips_check() {
        let store = MemorySessionStore::new();
        store.insert(Session::new("a"));
        store.invalidate("a");
        assert!(resolve(&store, "a").await.is_ok());
    }

    #[tokio::test]
    async fn test_rotation_cycle_expires() {
        let store = MemorySessionStore::new();
        store.rotate("a", "b");
        store.rotate("b", "a");
        assert_eq!(resolve(&store, "a").await, Err(Error::SessionExpired));
    }

    struct FailingStore;

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn get(&self, _sid: &str) -> std::result::Result<Option<Session>, StoreError> {
            Err(StoreError::Backend("session table locked".into()))
        }

        async fn check(&self, _session: &Session) -> std::result::Result<bool, StoreError> {
            Ok(true)
        }

        async fn create_anonymous(
            &self,
            _db: Option<String>,
        ) -> std::result::Result<Session, StoreError> {
            Err(StoreError::PoolBusy)
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        assert_eq!(
            resolve(&FailingStore, "a").await,
            Err(Error::Store("session table locked".into()))
        );
    }
}
