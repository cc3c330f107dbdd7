//! Registry of live connections, used for the shutdown broadcast.

use dashmap::DashMap;

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::message::CloseCode;

/// Concurrent map of every connection that has not reached `Closed`.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, handle: ConnectionHandle) {
        self.connections.insert(handle.id(), handle);
    }

    pub fn remove(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        self.connections.remove(id).map(|(_, handle)| handle)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        self.connections.get(id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Ask every open connection to close with `code`. Returns how many were
    /// asked.
    pub fn kick_all(&self, code: CloseCode, reason: &str) -> usize {
        let handles: Vec<ConnectionHandle> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .filter(ConnectionHandle::is_open)
            .collect();
        for handle in &handles {
            handle.close(code, reason);
        }
        tracing::info!(count = handles.len(), %code, "closing all websocket connections");
        handles.len()
    }
}
