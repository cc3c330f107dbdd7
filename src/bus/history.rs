//! Deduplication window over recently delivered notification ids.
//!
//! Notification ids are assigned before their transaction commits, so a
//! notification with a lower id can become visible after one with a higher
//! id was already delivered. Delivered ids stay in the history for a fixed
//! window and are excluded from the next polls; only once an id leaves the
//! window may the "last delivered" cursor move past it.
//!
//! Expired entries are trimmed from the lowest id up to the first entry
//! still inside the window. That entry blocks trimming of everything after
//! it, even of older entries, otherwise the cursor would jump over ids that
//! are still excluded and they would be fetched again. A transaction that
//! commits a low id very late delays the cursor for everyone, so long
//! transactions should create their notifications right before commit.

use std::time::Duration;

use tokio::time::Instant;

/// Delivered notification ids with their delivery time, sorted by id.
#[derive(Debug, Clone, Default)]
pub struct NotificationHistory {
    entries: Vec<(i64, Instant)>,
}

impl NotificationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that notification `id` was delivered at `at`.
    pub fn insert(&mut self, id: i64, at: Instant) {
        let index = self.entries.partition_point(|(entry, _)| *entry <= id);
        self.entries.insert(index, (id, at));
    }

    /// Ids currently remembered, ascending.
    pub fn ids(&self) -> Vec<i64> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the leading entries older than `window` at `now`, stopping at the
    /// first fresh one. Returns the highest id dropped.
    pub fn trim(&mut self, now: Instant, window: Duration) -> Option<i64> {
        let expired = self
            .entries
            .iter()
            .take_while(|(_, at)| now.saturating_duration_since(*at) > window)
            .count();
        if expired == 0 {
            return None;
        }
        let last = self.entries[expired - 1].0;
        self.entries.drain(..expired);
        Some(last)
    }
}
