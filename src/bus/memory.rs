//! In-memory session and notification stores.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::bus::session::{Session, SessionStore};
use crate::bus::store::{Notification, NotificationStore, StoreError};

/// Session store kept in a concurrent map.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, Session>,
    invalidated: DashMap<String, ()>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Session) {
        self.invalidated.remove(&session.sid);
        self.sessions.insert(session.sid.clone(), session);
    }

    pub fn remove(&self, sid: &str) -> Option<Session> {
        self.sessions.remove(sid).map(|(_, session)| session)
    }

    /// Point `old` at its successor `new`.
    pub fn rotate(&self, old: &str, new: &str) {
        self.sessions
            .entry(old.to_owned())
            .or_insert_with(|| Session::new(old))
            .next_sid = Some(new.to_owned());
    }

    /// Make the liveness check fail for `sid`.
    pub fn invalidate(&self, sid: &str) {
        self.invalidated.insert(sid.to_owned(), ());
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, sid: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.get(sid).map(|entry| entry.clone()))
    }

    async fn check(&self, session: &Session) -> Result<bool, StoreError> {
        Ok(!self.invalidated.contains_key(&session.sid))
    }

    async fn create_anonymous(&self, db: Option<String>) -> Result<Session, StoreError> {
        let mut session = Session::anonymous();
        session.db = db;
        self.insert(session.clone());
        tracing::debug!(sid = %session.sid, "anonymous session created");
        Ok(session)
    }
}

#[derive(Debug, Clone)]
struct Posted {
    channel: String,
    notification: Notification,
}

/// Notification store kept in memory, sorted by id.
#[derive(Debug, Default)]
pub struct MemoryNotificationStore {
    posted: RwLock<Vec<Posted>>,
    next_id: AtomicI64,
    busy_polls: AtomicUsize,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a notification with the next id and return that id.
    pub fn push(&self, channel: impl Into<String>, message: serde_json::Value) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.insert(id, channel, message);
        id
    }

    /// Post a notification with an explicit id, as a transaction committing
    /// out of id order would.
    pub fn insert(&self, id: i64, channel: impl Into<String>, message: serde_json::Value) {
        self.next_id.fetch_max(id, Ordering::SeqCst);
        let mut posted = self.posted.write();
        let index = posted.partition_point(|p| p.notification.id <= id);
        posted.insert(
            index,
            Posted {
                channel: channel.into(),
                notification: Notification { id, message },
            },
        );
    }

    /// Make the next `count` polls fail with [`StoreError::PoolBusy`].
    pub fn fail_next_polls(&self, count: usize) {
        self.busy_polls.store(count, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.posted.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.posted.read().is_empty()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn poll(
        &self,
        channels: &[String],
        since_id: i64,
        excluded_ids: &[i64],
    ) -> Result<Vec<Notification>, StoreError> {
        let busy = self
            .busy_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if busy {
            return Err(StoreError::PoolBusy);
        }

        let channels: HashSet<&str> = channels.iter().map(String::as_str).collect();
        let excluded: HashSet<i64> = excluded_ids.iter().copied().collect();
        Ok(self
            .posted
            .read()
            .iter()
            .filter(|p| p.notification.id > since_id)
            .filter(|p| !excluded.contains(&p.notification.id))
            .filter(|p| channels.contains(p.channel.as_str()))
            .map(|p| p.notification.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_poll_filters() {
        let store = MemoryNotificationStore::new();
        store.push("a", json!(1));
        store.push("b", json!(2));
        store.push("a", json!(3));
        store.push("a", json!(4));

        let channels = vec!["a".to_string()];
        let found = store.poll(&channels, 1, &[4]).await.unwrap();
        assert_eq!(found, vec![Notification { id: 3, message: json!(3) }]);
    }

    #[tokio::test]
    async fn test_insert_out_of_order() {
        let store = MemoryNotificationStore::new();
        store.insert(5, "a", json!("five"));
        store.insert(2, "a", json!("two"));
        assert_eq!(store.push("a", json!("six")), 6);

        let channels = vec!["a".to_string()];
        let ids: Vec<i64> = store
            .poll(&channels, 0, &[])
            .await
            .unwrap()
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec![2, 5, 6]);
    }

    #[tokio::test]
    async fn test_busy_polls() {
        let store = MemoryNotificationStore::new();
        store.fail_next_polls(1);
        assert_eq!(store.poll(&[], 0, &[]).await, Err(StoreError::PoolBusy));
        assert_eq!(store.poll(&[], 0, &[]).await, Ok(vec![]));
    }

    #[tokio::test]
    async fn test_session_store() {
        let store = MemorySessionStore::new();
        let session = store.create_anonymous(Some("main".into())).await.unwrap();
        assert_eq!(session.uid, None);
        assert_eq!(session.db.as_deref(), Some("main"));
        assert_eq!(store.get(&session.sid).await.unwrap(), Some(session.clone()));
        assert!(store.check(&session).await.unwrap());

        store.invalidate(&session.sid);
        assert!(!store.check(&session).await.unwrap());
        assert!(store.remove(&session.sid).is_some());
        assert!(store.is_empty());
    }
}
