//! The bus: shared state of every connection, the upgrade entry point and
//! the per-connection serve loop.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::bus::lifecycle::{ConnectionContext, HookError, LifecycleEvent, LifecycleHooks};
use crate::bus::memory::{MemoryNotificationStore, MemorySessionStore};
use crate::bus::registry::ConnectionRegistry;
use crate::bus::router::ChannelRouter;
use crate::bus::session::{self, Session, SessionStore};
use crate::bus::store::NotificationStore;
use crate::config::{Config, SUPPORTED_VERSIONS};
use crate::connection::{Connection, ConnectionHandle};
use crate::error::{Error, Result};
use crate::message::{CloseCode, Message};
use crate::protocol::{HandshakeRequest, HandshakeResponse};

/// Close reason telling the client its worker bundle is stale and it
/// should not reconnect with it.
pub const OUTDATED_VERSION: &str = "OUTDATED_VERSION";

/// Result of a successful upgrade negotiation.
#[derive(Debug, Clone)]
pub struct Upgrade {
    /// The `101 Switching Protocols` response to send.
    pub response: HandshakeResponse,
    /// Session the connection runs under, possibly downgraded.
    pub session: Session,
    /// The client runs an outdated worker and is closed right away.
    pub outdated: bool,
}

/// Explicit context of one application event.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session: Session,
    pub handle: ConnectionHandle,
    pub bus: Bus,
}

impl RequestContext {
    pub fn config(&self) -> &Config {
        self.bus.config()
    }
}

/// Application side of the serve loop.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one `{"event_name", "data"}` message.
    ///
    /// `Error::SessionExpired` closes the connection with `SESSION_EXPIRED`
    /// and `Error::PoolExhausted` with `TRY_LATER`. Any other error drops the
    /// message.
    async fn handle(&self, ctx: &RequestContext, event: &str, data: &Value) -> Result<()>;
}

#[async_trait]
impl EventHandler for () {
    async fn handle(&self, _ctx: &RequestContext, _event: &str, _data: &Value) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event_name: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct Subscription {
    #[serde(default)]
    channels: Vec<String>,
    #[serde(default)]
    last: i64,
}

struct Inner {
    config: Config,
    sessions: Arc<dyn SessionStore>,
    notifications: Arc<dyn NotificationStore>,
    hooks: RwLock<LifecycleHooks>,
    registry: ConnectionRegistry,
    router: ChannelRouter,
    reload_generation: AtomicU64,
}

/// Process-wide notification bus.
///
/// Cheap to clone; every clone shares the same registry, router and stores.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<Inner>,
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("connections", &self.inner.registry.len())
            .field("reload_generation", &self.reload_generation())
            .finish_non_exhaustive()
    }
}

impl Bus {
    /// A bus with in-memory stores.
    pub fn new(config: Config) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> BusBuilder {
        BusBuilder::default()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn router(&self) -> &ChannelRouter {
        &self.inner.router
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.inner.sessions
    }

    pub fn notifications(&self) -> &Arc<dyn NotificationStore> {
        &self.inner.notifications
    }

    pub fn on_open<F>(&self, hook: F)
    where
        F: Fn(&ConnectionContext) -> std::result::Result<(), HookError> + Send + Sync + 'static,
    {
        self.inner.hooks.write().on_open(hook);
    }

    pub fn on_close<F>(&self, hook: F)
    where
        F: Fn(&ConnectionContext) -> std::result::Result<(), HookError> + Send + Sync + 'static,
    {
        self.inner.hooks.write().on_close(hook);
    }

    /// Incremented each time configuration or schema is reloaded.
    pub fn reload_generation(&self) -> u64 {
        self.inner.reload_generation.load(Ordering::Acquire)
    }

    /// Record a configuration reload. Server errors of operations that were
    /// in flight meanwhile are logged as expected.
    pub fn signal_reload(&self) {
        self.inner.reload_generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Trigger a dispatch on every connection listening on `channels`.
    pub fn notify<S: AsRef<str>>(&self, channels: &[S]) -> usize {
        self.inner.router.notify(channels)
    }

    /// Close every open connection with `GOING_AWAY`.
    pub fn shutdown(&self) -> usize {
        self.inner.registry.kick_all(CloseCode::GoingAway, "")
    }

    /// Negotiate the upgrade of `request` for `session`.
    ///
    /// Cross-site requests are downgraded to a fresh anonymous session first
    /// when same-site sessions are enforced.
    ///
    /// # Errors
    ///
    /// - `Error::Handshake` if the upgrade headers are invalid
    /// - `Error::Store` if the anonymous session cannot be created
    pub async fn handshake(&self, request: &HandshakeRequest, session: Session) -> Result<Upgrade> {
        let session = if self.inner.config.same_site_only && !request.is_same_site() {
            tracing::warn!(
                origin = request.header("origin").unwrap_or_default(),
                host = request.header("host").unwrap_or_default(),
                "cross-site websocket, downgrading to anonymous session"
            );
            self.inner.sessions.create_anonymous(session.db).await?
        } else {
            session
        };

        let response = request.validate(SUPPORTED_VERSIONS)?;

        // Non-browser clients do not run the worker bundle.
        let outdated = request.header("user-agent").is_some()
            && request.query_param("version").as_deref()
                != Some(self.inner.config.worker_version.as_str());

        Ok(Upgrade {
            response,
            session,
            outdated,
        })
    }

    /// Start a connection over an upgraded stream.
    pub fn connect<T>(&self, io: T, session: Session) -> Connection<T> {
        let conn = Connection::new(io, session, self.clone());
        self.inner.registry.add(conn.handle().clone());
        tracing::info!(
            connection_id = %conn.id(),
            sid = %conn.session().sid,
            "websocket connection opened"
        );
        let ctx = ConnectionContext {
            handle: conn.handle().clone(),
            session: conn.session().clone(),
        };
        self.fire(LifecycleEvent::Open, &ctx);
        conn
    }

    /// Start a connection after a successful [`handshake`](Self::handshake),
    /// closing it right away if the client runs an outdated worker.
    pub fn accept<T>(&self, io: T, upgrade: Upgrade) -> Connection<T> {
        let conn = self.connect(io, upgrade.session);
        if upgrade.outdated {
            tracing::info!(connection_id = %conn.id(), "outdated worker version, closing");
            conn.handle().close(CloseCode::Normal, OUTDATED_VERSION);
        }
        conn
    }

    /// Forget a connection that reached `Closed`.
    pub(crate) fn release(&self, handle: &ConnectionHandle, session: &Session) {
        let id = handle.id();
        self.inner.router.unsubscribe(&id);
        if self.inner.registry.remove(&id).is_none() {
            return;
        }
        let ctx = ConnectionContext {
            handle: handle.clone(),
            session: session.clone(),
        };
        self.fire(LifecycleEvent::Close, &ctx);
    }

    fn fire(&self, event: LifecycleEvent, ctx: &ConnectionContext) {
        let hooks = self.inner.hooks.read().clone();
        hooks.fire(event, ctx);
    }

    /// Run `conn` to completion, handing every application event to
    /// `handler`.
    pub async fn serve<T, H>(&self, mut conn: Connection<T>, handler: &H)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
        H: EventHandler + ?Sized,
    {
        while let Some(message) = conn.recv().await {
            match self.serve_message(&mut conn, handler, message).await {
                Ok(()) => {}
                Err(Error::SessionExpired) => {
                    conn.handle().close(CloseCode::SessionExpired, "");
                }
                Err(err @ Error::PoolExhausted { .. }) => {
                    tracing::warn!(connection_id = %conn.id(), error = %err, "closing connection");
                    conn.handle().close(CloseCode::TryLater, "");
                }
                Err(err) => {
                    tracing::warn!(connection_id = %conn.id(), error = %err, "dropping websocket message");
                }
            }
        }
    }

    async fn serve_message<T, H>(
        &self,
        conn: &mut Connection<T>,
        handler: &H,
        message: Message,
    ) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
        H: EventHandler + ?Sized,
    {
        let Message::Text(text) = message else {
            return Err(Error::InvalidRequest("expected a text message".into()));
        };
        let envelope: Envelope =
            serde_json::from_str(&text).map_err(|e| Error::InvalidRequest(e.to_string()))?;

        let session = session::resolve(self.inner.sessions.as_ref(), &conn.session().sid).await?;
        conn.set_session(session.clone());

        if envelope.event_name == "subscribe" {
            let subscription: Subscription = serde_json::from_value(envelope.data.clone())
                .map_err(|e| Error::InvalidRequest(e.to_string()))?;
            conn.subscribe(subscription.channels, subscription.last);
        }

        let ctx = RequestContext {
            session,
            handle: conn.handle().clone(),
            bus: self.clone(),
        };
        handler
            .handle(&ctx, &envelope.event_name, &envelope.data)
            .await
    }
}

/// Builder for [`Bus`].
#[derive(Default)]
pub struct BusBuilder {
    config: Config,
    sessions: Option<Arc<dyn SessionStore>>,
    notifications: Option<Arc<dyn NotificationStore>>,
    hooks: LifecycleHooks,
}

impl BusBuilder {
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn sessions<S: SessionStore + 'static>(mut self, store: Arc<S>) -> Self {
        self.sessions = Some(store as Arc<dyn SessionStore>);
        self
    }

    #[must_use]
    pub fn notifications<S: NotificationStore + 'static>(mut self, store: Arc<S>) -> Self {
        self.notifications = Some(store as Arc<dyn NotificationStore>);
        self
    }

    #[must_use]
    pub fn on_open<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ConnectionContext) -> std::result::Result<(), HookError> + Send + Sync + 'static,
    {
        self.hooks.on_open(hook);
        self
    }

    #[must_use]
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ConnectionContext) -> std::result::Result<(), HookError> + Send + Sync + 'static,
    {
        self.hooks.on_close(hook);
        self
    }

    pub fn build(self) -> Bus {
        Bus {
            inner: Arc::new(Inner {
                config: self.config,
                sessions: self
                    .sessions
                    .unwrap_or_else(|| Arc::new(MemorySessionStore::new())),
                notifications: self
                    .notifications
                    .unwrap_or_else(|| Arc::new(MemoryNotificationStore::new())),
                hooks: RwLock::new(self.hooks),
                registry: ConnectionRegistry::new(),
                router: ChannelRouter::new(),
                reload_generation: AtomicU64::new(0),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(extra: &[(&str, &str)], path: &str) -> HandshakeRequest {
        let mut headers = vec![
            ("Host", "example.com"),
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("Sec-WebSocket-Version", "13"),
        ];
        headers.extend_from_slice(extra);
        HandshakeRequest::from_headers(path, headers)
    }

    #[tokio::test]
    async fn test_handshake_accepts_same_site() {
        let bus = Bus::new(Config::default().with_same_site_only(true));
        let req = request(&[("Origin", "http://example.com")], "/websocket");
        let upgrade = bus.handshake(&req, Session::new("sid")).await.unwrap();
        assert_eq!(upgrade.response.accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(upgrade.session.sid, "sid");
        assert!(!upgrade.outdated);
    }

    #[tokio::test]
    async fn test_handshake_downgrades_cross_site() {
        let bus = Bus::new(Config::default().with_same_site_only(true));
        let req = request(&[("Origin", "https://evil.example")], "/websocket");
        let session = Session::new("sid").with_uid(2).with_db("main");
        let upgrade = bus.handshake(&req, session).await.unwrap();
        assert_ne!(upgrade.session.sid, "sid");
        assert_eq!(upgrade.session.uid, None);
        assert_eq!(upgrade.session.db.as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn test_handshake_keeps_cross_site_when_allowed() {
        let bus = Bus::new(Config::default());
        let req = request(&[("Origin", "https://evil.example")], "/websocket");
        let upgrade = bus.handshake(&req, Session::new("sid")).await.unwrap();
        assert_eq!(upgrade.session.sid, "sid");
    }

    #[tokio::test]
    async fn test_handshake_rejects_missing_origin() {
        let bus = Bus::new(Config::default());
        let req = request(&[], "/websocket");
        let err = bus.handshake(&req, Session::new("sid")).await.unwrap_err();
        assert!(matches!(err, Error::Handshake(_)));
    }

    #[tokio::test]
    async fn test_outdated_worker_version() {
        let bus = Bus::new(Config::default().with_worker_version("17.0-3"));
        let origin = ("Origin", "http://example.com");
        let browser = ("User-Agent", "Mozilla/5.0");

        let req = request(&[origin, browser], "/websocket?version=17.0-2");
        assert!(bus.handshake(&req, Session::new("a")).await.unwrap().outdated);

        let req = request(&[origin, browser], "/websocket?version=17.0-3");
        assert!(!bus.handshake(&req, Session::new("a")).await.unwrap().outdated);

        let req = request(&[origin], "/websocket?version=17.0-2");
        assert!(!bus.handshake(&req, Session::new("a")).await.unwrap().outdated);

        let bus = Bus::new(Config::default().with_worker_version("saas~17.2+1"));
        let req = request(&[origin, browser], "/websocket?version=saas%7E17.2%2B1");
        assert!(!bus.handshake(&req, Session::new("a")).await.unwrap().outdated);
    }

    #[test]
    fn test_reload_generation() {
        let bus = Bus::new(Config::default());
        assert_eq!(bus.reload_generation(), 0);
        bus.clone().signal_reload();
        assert_eq!(bus.reload_generation(), 1);
    }
}
