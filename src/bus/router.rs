//! Channel to connection subscription index.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::connection::{ConnectionHandle, ConnectionId};

#[derive(Debug)]
struct Subscription {
    handle: ConnectionHandle,
    channels: Vec<String>,
}

/// Knows which connections listen on which channels, so that producers can
/// wake exactly the connections concerned by new notifications.
#[derive(Debug, Default)]
pub struct ChannelRouter {
    channels: DashMap<String, HashSet<ConnectionId>>,
    subscriptions: DashMap<ConnectionId, Subscription>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the channels `handle` listens on.
    pub fn subscribe(&self, handle: &ConnectionHandle, channels: &[String]) {
        let id = handle.id();
        self.unsubscribe(&id);
        for channel in channels {
            self.channels.entry(channel.clone()).or_default().insert(id);
        }
        self.subscriptions.insert(
            id,
            Subscription {
                handle: handle.clone(),
                channels: channels.to_vec(),
            },
        );
    }

    /// Forget every subscription of a connection.
    pub fn unsubscribe(&self, id: &ConnectionId) {
        let Some((_, subscription)) = self.subscriptions.remove(id) else {
            return;
        };
        for channel in &subscription.channels {
            if let Some(mut ids) = self.channels.get_mut(channel) {
                ids.remove(id);
            }
            self.channels.remove_if(channel, |_, ids| ids.is_empty());
        }
    }

    /// Trigger a dispatch on every connection subscribed to any of
    /// `channels`. Returns the number of connections triggered.
    pub fn notify<S: AsRef<str>>(&self, channels: &[S]) -> usize {
        let mut targets = HashSet::new();
        for channel in channels {
            if let Some(ids) = self.channels.get(channel.as_ref()) {
                targets.extend(ids.iter().copied());
            }
        }
        let handles: Vec<ConnectionHandle> = targets
            .iter()
            .filter_map(|id| self.subscriptions.get(id).map(|s| s.handle.clone()))
            .collect();
        for handle in &handles {
            handle.trigger();
        }
        handles.len()
    }

    /// Channels `id` is subscribed to.
    pub fn channels_of(&self, id: &ConnectionId) -> Vec<String> {
        self.subscriptions
            .get(id)
            .map(|s| s.channels.clone())
            .unwrap_or_default()
    }

    /// Number of connections with at least one subscription.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
