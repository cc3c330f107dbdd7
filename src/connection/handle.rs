//! Cloneable, thread-safe handle onto a running connection.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use uuid::Uuid;

use crate::connection::ConnectionState;
use crate::connection::command::{Command, CommandQueue};
use crate::message::CloseCode;

/// Unique identifier of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a new random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug)]
struct Inner {
    id: ConnectionId,
    state: AtomicU8,
    dispatch_pending: AtomicBool,
    queue: CommandQueue,
}

/// Handle used by other tasks and threads to drive a connection.
///
/// The socket itself is only ever touched by the connection's own task;
/// handles talk to it through its command queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

impl ConnectionHandle {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ConnectionId::new(),
                state: AtomicU8::new(ConnectionState::Open.as_u8()),
                dispatch_pending: AtomicBool::new(false),
                queue: CommandQueue::new(),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.inner.state.store(state.as_u8(), Ordering::Release);
    }

    /// Signal that new notifications may be available.
    ///
    /// Does nothing unless the connection is open. Triggers coalesce until
    /// the connection starts the dispatch pass they requested.
    pub fn trigger(&self) {
        if !self.is_open() {
            return;
        }
        if self
            .inner
            .dispatch_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.queue.push(Command::Dispatch);
        }
    }

    /// Ask the connection to close. The closing handshake starts on the
    /// next iteration of its event loop.
    pub fn close(&self, code: CloseCode, reason: impl Into<String>) {
        if !self.state().is_active() {
            return;
        }
        self.inner.queue.push(Command::Close {
            code,
            reason: reason.into(),
        });
    }

    /// Whether a dispatch pass is queued but not yet started.
    pub fn dispatch_pending(&self) -> bool {
        self.inner.dispatch_pending.load(Ordering::Acquire)
    }

    pub(crate) fn clear_dispatch_pending(&self) {
        self.inner.dispatch_pending.store(false, Ordering::Release);
    }

    pub(crate) fn queue(&self) -> &CommandQueue {
        &self.inner.queue
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ConnectionHandle {}
