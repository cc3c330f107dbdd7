use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{Instant, sleep_until};

use crate::bus::{Bus, Dispatcher, Session};
use crate::codec::WebSocketCodec;
use crate::connection::{
    Command, ConnectionHandle, ConnectionId, ConnectionState, RateLimiter, TimeoutManager,
    TimeoutReason,
};
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::{Frame, FrameValidator, MessageAssembler, OpCode};

/// How long the input is drained after shutting down the write side.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A server side WebSocket connection and its event loop.
///
/// The connection is driven by [`recv`](Self::recv), which multiplexes the
/// socket, the command queue fed by [`ConnectionHandle`]s, and the timers.
/// Control frames, dispatch passes and the closing handshake are handled
/// inside the loop; only complete data messages come out of it.
///
/// Errors never escape the loop: each one is mapped to a close code and the
/// connection disconnects through the same path whatever the cause.
///
/// ## Example
///
/// ```rust,ignore
/// use wsbus::{Bus, Config, Message};
///
/// let bus = Bus::new(Config::default());
/// let mut conn = bus.accept(stream, upgrade);
///
/// while let Some(msg) = conn.recv().await {
///     conn.send(Message::text("ack")).await?;
/// }
/// ```
pub struct Connection<T> {
    handle: ConnectionHandle,
    codec: WebSocketCodec<T>,
    assembler: MessageAssembler,
    timeouts: TimeoutManager,
    rate_limiter: RateLimiter,
    dispatcher: Dispatcher,
    bus: Bus,
    inactivity_timeout: Duration,
    close_sent: bool,
    close_received: bool,
    generation: u64,
}

impl<T> Connection<T> {
    /// Wrap an upgraded stream. Use [`Bus::connect`] or [`Bus::accept`],
    /// which also register the connection.
    pub(crate) fn new(io: T, session: Session, bus: Bus) -> Self {
        let config = bus.config();
        Self {
            handle: ConnectionHandle::new(),
            codec: WebSocketCodec::new(io, FrameValidator::new(config.limits.clone())),
            assembler: MessageAssembler::new(config.limits.clone()),
            timeouts: TimeoutManager::new(
                config.keep_alive_timeout,
                config.response_timeout,
                Instant::now(),
            ),
            rate_limiter: RateLimiter::new(config.rate_limit),
            dispatcher: Dispatcher::new(session, config.notification_history, config.pool_retry),
            inactivity_timeout: config.inactivity_timeout(),
            close_sent: false,
            close_received: false,
            generation: bus.reload_generation(),
            bus,
        }
    }

    /// Feed bytes that were read past the end of the upgrade request.
    #[must_use]
    pub fn with_buffered(mut self, data: &[u8]) -> Self {
        self.codec.extend_read_buffer(data);
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub fn session(&self) -> &Session {
        self.dispatcher.session()
    }

    pub fn set_session(&mut self, session: Session) {
        self.dispatcher.set_session(session);
    }

    /// Channels the connection is subscribed to.
    pub fn channels(&self) -> &[String] {
        self.dispatcher.channels()
    }

    /// Replace the subscribed channels and start a dispatch pass.
    ///
    /// `last` is the id of the last notification the client saw; it is only
    /// taken into account on the first subscription.
    pub fn subscribe(&mut self, channels: Vec<String>, last: i64) {
        self.bus.router().subscribe(&self.handle, &channels);
        self.dispatcher.subscribe(channels, last);
        self.handle.trigger();
    }

    fn release(&mut self) {
        self.handle.set_state(ConnectionState::Closed);
        self.handle.queue().clear();
        self.bus.release(&self.handle, self.dispatcher.session());
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Connection<T> {
    /// Run the event loop until a data message arrives.
    ///
    /// Returns `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            if self.state() == ConnectionState::Closed {
                return None;
            }
            self.generation = self.bus.reload_generation();
            match self.step().await {
                Ok(Some(message)) => return Some(message),
                Ok(None) => {}
                Err(err) => self.fail(err).await,
            }
        }
    }

    /// Send a data message.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidState` unless the connection is open
    /// - I/O errors from the underlying stream
    pub async fn send(&mut self, message: Message) -> Result<()> {
        let state = self.state();
        if !state.can_send() {
            return Err(Error::InvalidState(format!("cannot send while {state}")));
        }
        self.write_frame(Frame::from(message)).await
    }

    async fn step(&mut self) -> Result<Option<Message>> {
        let now = Instant::now();
        if let Some(reason) = self.timeouts.has_timed_out(now) {
            self.on_timeout(reason).await;
            return Ok(None);
        }

        let idle = now + self.inactivity_timeout;
        let wake = idle.min(self.timeouts.deadline());
        let open = self.state() == ConnectionState::Open;

        tokio::select! {
            biased;
            command = self.handle.queue().recv(), if open => {
                self.on_command(command).await?;
                Ok(None)
            }
            frame = self.codec.read_frame_with(|| self.rate_limiter.check(Instant::now())) => {
                self.on_frame(frame?).await
            }
            () = sleep_until(wake) => {
                self.on_idle(idle).await?;
                Ok(None)
            }
        }
    }

    async fn on_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Close { code, reason } => {
                self.disconnect(code, &reason).await;
                Ok(())
            }
            Command::Dispatch => {
                self.handle.clear_dispatch_pending();
                self.dispatch().await
            }
        }
    }

    async fn dispatch(&mut self) -> Result<()> {
        let notifications = self
            .dispatcher
            .pass(
                self.bus.sessions().as_ref(),
                self.bus.notifications().as_ref(),
                Instant::now(),
            )
            .await?;
        if notifications.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            connection_id = %self.id(),
            count = notifications.len(),
            "dispatching notifications"
        );
        let payload =
            serde_json::to_string(&notifications).map_err(|e| Error::Internal(e.to_string()))?;
        self.send(Message::Text(payload)).await
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<Option<Message>> {
        let opcode = frame.opcode;
        self.timeouts.acknowledge_received(opcode);

        match opcode {
            OpCode::Ping => {
                self.write_frame(Frame::pong(frame.into_payload())).await?;
                Ok(None)
            }
            OpCode::Pong => Ok(None),
            OpCode::Close => {
                self.on_close_frame(frame.payload()).await?;
                Ok(None)
            }
            // No data is processed once the closing handshake started.
            _ if self.state() != ConnectionState::Open => Ok(None),
            _ => self.assembler.push(frame),
        }
    }

    async fn on_close_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.handle.set_state(ConnectionState::Closing);
        self.close_received = true;
        let (code, reason) = CloseFrame::parse(payload)?
            .unwrap_or((CloseCode::Normal.as_u16(), String::new()));
        tracing::debug!(connection_id = %self.id(), code, "close frame received");

        if self.close_sent {
            self.terminate().await;
            return Ok(());
        }
        let close = CloseFrame::new(CloseCode::from_u16(code), reason)?;
        self.send_close(close).await
    }

    async fn on_idle(&mut self, idle: Instant) -> Result<()> {
        if Instant::now() < idle
            || self.state() != ConnectionState::Open
            || self.timeouts.awaited_opcode().is_some()
        {
            return Ok(());
        }
        self.write_frame(Frame::ping(Vec::new())).await
    }

    async fn on_timeout(&mut self, reason: TimeoutReason) {
        if self.state() != ConnectionState::Open {
            tracing::debug!(connection_id = %self.id(), ?reason, "closing handshake timed out");
            self.terminate().await;
            return;
        }
        let code = match reason {
            TimeoutReason::NoResponse => CloseCode::AbnormalClosure,
            TimeoutReason::KeepAlive => CloseCode::KeepAliveTimeout,
        };
        tracing::info!(connection_id = %self.id(), ?reason, %code, "websocket timed out");
        self.disconnect(code, "").await;
    }

    async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        self.codec.write_frame(&frame).await?;
        self.codec.flush().await?;
        self.timeouts.acknowledge_sent(frame.opcode, Instant::now());
        Ok(())
    }

    async fn send_close(&mut self, close: CloseFrame) -> Result<()> {
        self.write_frame(close.to_frame()).await?;
        self.close_sent = true;
        self.handle.set_state(ConnectionState::Closing);
        tracing::debug!(connection_id = %self.id(), code = %close.code, "close frame sent");
        if !close.code.is_clean() || self.close_received {
            self.terminate().await;
        }
        Ok(())
    }

    /// Start the closing handshake with `code`, or tear the connection down
    /// right away for abrupt codes and once our close frame is already out.
    async fn disconnect(&mut self, code: CloseCode, reason: &str) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        if code.is_abrupt() || self.close_sent {
            self.terminate().await;
            return;
        }
        let sent = match CloseFrame::new(code, reason) {
            Ok(close) => self.send_close(close).await,
            Err(err) => Err(err),
        };
        if let Err(err) = sent {
            tracing::debug!(connection_id = %self.id(), error = %err, "could not send close frame");
            self.terminate().await;
        }
    }

    async fn fail(&mut self, err: Error) {
        let code = err.close_code();
        let id = self.id();
        match code {
            CloseCode::ServerError if self.bus.reload_generation() != self.generation => {
                tracing::warn!(
                    connection_id = %id,
                    error = %err,
                    "websocket error caused by a configuration reload"
                );
            }
            CloseCode::ServerError => {
                tracing::error!(connection_id = %id, error = %err, "websocket server error");
            }
            CloseCode::AbnormalClosure => {
                tracing::debug!(connection_id = %id, error = %err, "websocket transport lost");
            }
            _ => {
                tracing::warn!(connection_id = %id, error = %err, %code, "closing websocket");
            }
        }
        let reason = err.close_reason().unwrap_or_default();
        self.disconnect(code, &reason).await;
    }

    /// Shut the transport down and forget the connection.
    async fn terminate(&mut self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        if let Err(err) = self.codec.shutdown().await {
            tracing::debug!(connection_id = %self.id(), error = %err, "shutdown failed");
        }
        self.codec.drain(DRAIN_TIMEOUT).await;
        self.release();
        tracing::info!(connection_id = %self.id(), "websocket connection closed");
    }
}

impl<T> Drop for Connection<T> {
    fn drop(&mut self) {
        if self.state() != ConnectionState::Closed {
            self.release();
        }
    }
}

impl<T> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("close_sent", &self.close_sent)
            .field("close_received", &self.close_received)
            .finish_non_exhaustive()
    }
}
