//! Callbacks run when connections open and close.

use std::fmt;
use std::sync::Arc;

use crate::bus::session::Session;
use crate::connection::{ConnectionHandle, ConnectionId};

/// Error returned by a lifecycle callback.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

type Hook = Arc<dyn Fn(&ConnectionContext) -> Result<(), HookError> + Send + Sync>;

/// Connection lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Open,
    Close,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Open => f.write_str("OPEN"),
            LifecycleEvent::Close => f.write_str("CLOSE"),
        }
    }
}

/// What a callback gets to know about the connection.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub handle: ConnectionHandle,
    pub session: Session,
}

impl ConnectionContext {
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }
}

/// Registered open and close callbacks.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    on_open: Vec<Hook>,
    on_close: Vec<Hook>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open<F>(&mut self, hook: F)
    where
        F: Fn(&ConnectionContext) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.on_open.push(Arc::new(hook));
    }

    pub fn on_close<F>(&mut self, hook: F)
    where
        F: Fn(&ConnectionContext) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.on_close.push(Arc::new(hook));
    }

    /// Run every callback registered for `event`. A failing callback is
    /// logged and does not prevent the others from running.
    pub fn fire(&self, event: LifecycleEvent, ctx: &ConnectionContext) {
        let hooks = match event {
            LifecycleEvent::Open => &self.on_open,
            LifecycleEvent::Close => &self.on_close,
        };
        for hook in hooks {
            if let Err(err) = hook(ctx) {
                tracing::warn!(
                    connection_id = %ctx.id(),
                    error = %err,
                    "Error during websocket {} callback",
                    event
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.on_open.len() + self.on_close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("on_open", &self.on_open.len())
            .field("on_close", &self.on_close.len())
            .finish()
    }
}
