//! # wsbus - WebSocket notification bus
//!
//! `wsbus` is an RFC 6455 server side WebSocket transport with a
//! per-connection event loop built for pushing real-time notifications.
//!
//! ## Features
//!
//! - **Strict frame codec** with masking, control frame and size checks
//! - **Upgrade negotiation** from raw HTTP or an existing header map
//! - **One task per connection**, driven from other threads through a
//!   priority command queue
//! - **Keep-alive, response timeouts and rate limiting** per connection
//! - **Notification dispatch** with a deduplication window that never skips
//!   a late committed notification
//! - **Connection registry** for a graceful shutdown broadcast
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wsbus::{Bus, Config, HandshakeRequest, Session};
//!
//! let bus = Bus::new(Config::default());
//! let request = HandshakeRequest::parse(&head)?;
//! let upgrade = bus.handshake(&request, Session::anonymous()).await?;
//! let mut out = Vec::new();
//! upgrade.response.write(&mut out);
//! stream.write_all(&out).await?;
//! bus.serve(bus.accept(stream, upgrade), &()).await;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;

#[cfg(feature = "async-tokio")]
pub mod bus;
#[cfg(feature = "async-tokio")]
pub mod codec;

pub use config::{Config, ConfigError, Limits, PoolRetry, RateLimit, SUPPORTED_VERSIONS};
pub use connection::ConnectionState;
pub use error::{Error, HandshakeError, Result};
pub use message::{CloseCode, CloseFrame, Message};
pub use protocol::{
    Frame, HandshakeRequest, HandshakeResponse, OpCode, WS_GUID, compute_accept_key,
};

#[cfg(feature = "async-tokio")]
pub use bus::{
    Bus, BusBuilder, ChannelRouter, ConnectionRegistry, EventHandler, MemoryNotificationStore,
    MemorySessionStore, Notification, NotificationStore, RequestContext, Session, SessionStore,
    StoreError, Upgrade,
};
#[cfg(feature = "async-tokio")]
pub use codec::WebSocketCodec;
#[cfg(feature = "async-tokio")]
pub use connection::{Connection, ConnectionHandle, ConnectionId};
