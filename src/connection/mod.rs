//! Connection state machine and event loop.
//!
//! Each connection is owned by a single task running [`Connection::recv`].
//! Other tasks and threads only hold [`ConnectionHandle`]s, which push
//! [`Command`]s into the connection's queue.
//!
//! ## Connection Lifecycle
//!
//! 1. **Open** - Initial state after the upgrade
//! 2. **Closing** - A close frame was sent or received
//! 3. **Closed** - Transport shut down, the connection is forgotten

mod state;

pub use state::ConnectionState;

#[cfg(feature = "async-tokio")]
mod command;
#[cfg(feature = "async-tokio")]
#[allow(clippy::module_inception)]
mod connection;
#[cfg(feature = "async-tokio")]
mod handle;
#[cfg(feature = "async-tokio")]
mod rate_limit;
#[cfg(feature = "async-tokio")]
mod timeout;

#[cfg(feature = "async-tokio")]
pub use command::{Command, CommandQueue};
#[cfg(feature = "async-tokio")]
pub use connection::Connection;
#[cfg(feature = "async-tokio")]
pub use handle::{ConnectionHandle, ConnectionId};
#[cfg(feature = "async-tokio")]
pub use rate_limit::RateLimiter;
#[cfg(feature = "async-tokio")]
pub use timeout::{TimeoutManager, TimeoutReason};
