//! Notification bus: channel subscriptions, per-connection dispatch with a
//! deduplication window, session resolution, lifecycle callbacks and the
//! registry used for the shutdown broadcast.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wsbus::{Bus, Config, HandshakeRequest, MemoryNotificationStore, Session};
//!
//! let store = Arc::new(MemoryNotificationStore::new());
//! let bus = Bus::builder()
//!     .config(Config::from_env()?)
//!     .notifications(Arc::clone(&store))
//!     .build();
//!
//! let request = HandshakeRequest::parse(&head)?;
//! let upgrade = bus.handshake(&request, Session::anonymous()).await?;
//! // write upgrade.response, then:
//! bus.serve(bus.accept(stream, upgrade), &()).await;
//!
//! // elsewhere
//! store.push("broadcast", serde_json::json!({"type": "ping"}));
//! bus.notify(&["broadcast"]);
//! ```

mod dispatcher;
mod history;
mod lifecycle;
mod memory;
mod registry;
mod router;
mod serve;
mod session;
mod store;

pub use dispatcher::Dispatcher;
pub use history::NotificationHistory;
pub use lifecycle::{ConnectionContext, HookError, LifecycleEvent, LifecycleHooks};
pub use memory::{MemoryNotificationStore, MemorySessionStore};
pub use registry::ConnectionRegistry;
pub use router::ChannelRouter;
pub use serve::{Bus, BusBuilder, EventHandler, OUTDATED_VERSION, RequestContext, Upgrade};
pub use session::{MAX_SESSION_HOPS, Session, SessionStore, resolve as resolve_session};
pub use store::{Notification, NotificationStore, StoreError, with_pool_retry};
