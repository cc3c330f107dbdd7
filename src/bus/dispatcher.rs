//! Per-connection notification delivery state.

use std::time::Duration;

use tokio::time::Instant;

use crate::bus::history::NotificationHistory;
use crate::bus::session::{self, Session, SessionStore};
use crate::bus::store::{Notification, NotificationStore, with_pool_retry};
use crate::config::PoolRetry;
use crate::error::Result;

/// Subscribed channels and delivery bookkeeping of one connection.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    session: Session,
    channels: Vec<String>,
    last_delivered_id: i64,
    history: NotificationHistory,
    window: Duration,
    retry: PoolRetry,
}

impl Dispatcher {
    pub fn new(session: Session, window: Duration, retry: PoolRetry) -> Self {
        Self {
            session,
            channels: Vec::new(),
            last_delivered_id: 0,
            history: NotificationHistory::new(),
            window,
            retry,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn set_session(&mut self, session: Session) {
        self.session = session;
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Highest id known to be delivered and out of the dedup window.
    pub fn last_delivered_id(&self) -> i64 {
        self.last_delivered_id
    }

    /// Replace the channel set.
    ///
    /// The client's `last` id is only taken the first time: afterwards the
    /// server's own bookkeeping is more accurate than the client's.
    pub fn subscribe(&mut self, channels: Vec<String>, last: i64) {
        self.channels = channels;
        if self.last_delivered_id == 0 {
            self.last_delivered_id = last;
        }
    }

    /// Fetch the notifications to deliver now.
    ///
    /// Re-resolves the session first, so a connection whose session expired
    /// stops receiving anything. Returns an empty batch when there is
    /// nothing new.
    ///
    /// # Errors
    ///
    /// - `Error::SessionExpired` if the session is gone or invalid
    /// - `Error::PoolExhausted` if the store stayed busy through every retry
    /// - `Error::Store` for other store failures
    pub async fn pass(
        &mut self,
        sessions: &dyn SessionStore,
        store: &dyn NotificationStore,
        now: Instant,
    ) -> Result<Vec<Notification>> {
        self.session = session::resolve(sessions, &self.session.sid).await?;

        let channels = &self.channels;
        let since = self.last_delivered_id;
        let excluded = self.history.ids();
        let notifications = with_pool_retry(self.retry, || store.poll(channels, since, &excluded)).await?;
        if notifications.is_empty() {
            return Ok(notifications);
        }

        for notification in &notifications {
            self.history.insert(notification.id, now);
        }
        if let Some(last) = self.history.trim(now, self.window) {
            self.last_delivered_id = last;
        }
        Ok(notifications)
    }
}
