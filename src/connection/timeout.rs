//! Keep-alive and response deadlines of a connection.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::protocol::OpCode;

/// Why a connection timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutReason {
    /// The connection outlived its keep-alive budget.
    KeepAlive,
    /// A PING or CLOSE frame went unanswered.
    NoResponse,
}

/// Tracks the lifetime budget of a connection and the answer awaited for the
/// last PING or CLOSE frame sent.
#[derive(Debug, Clone)]
pub struct TimeoutManager {
    opened_at: Instant,
    lifetime: Duration,
    response_timeout: Duration,
    awaited_opcode: Option<OpCode>,
    waiting_since: Option<Instant>,
}

impl TimeoutManager {
    /// Start tracking a connection opened at `now`.
    ///
    /// The lifetime is `keep_alive` plus a random jitter of up to half of it,
    /// so connections opened together do not all expire together.
    pub fn new(keep_alive: Duration, response_timeout: Duration, now: Instant) -> Self {
        let jitter = rand::thread_rng().gen_range(Duration::ZERO..=keep_alive / 2);
        Self::with_lifetime(keep_alive + jitter, response_timeout, now)
    }

    /// Start tracking with an exact lifetime.
    pub fn with_lifetime(lifetime: Duration, response_timeout: Duration, now: Instant) -> Self {
        Self {
            opened_at: now,
            lifetime,
            response_timeout,
            awaited_opcode: None,
            waiting_since: None,
        }
    }

    /// Jittered lifetime of the connection.
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Opcode of the frame the peer is expected to answer with, if any.
    pub fn awaited_opcode(&self) -> Option<OpCode> {
        self.awaited_opcode
    }

    /// Record a sent frame. PING starts waiting for a PONG, CLOSE for a CLOSE.
    pub fn acknowledge_sent(&mut self, opcode: OpCode, now: Instant) {
        if self.has_timed_out(now).is_some() {
            return;
        }
        let awaited = match opcode {
            OpCode::Ping => OpCode::Pong,
            OpCode::Close => OpCode::Close,
            _ => return,
        };
        self.awaited_opcode = Some(awaited);
        self.waiting_since = Some(now);
    }

    /// Record a received frame, clearing the wait if it is the awaited one.
    pub fn acknowledge_received(&mut self, opcode: OpCode) {
        if self.awaited_opcode == Some(opcode) {
            self.awaited_opcode = None;
            self.waiting_since = None;
        }
    }

    /// Check both deadlines at `now`. The keep-alive budget is checked first.
    pub fn has_timed_out(&self, now: Instant) -> Option<TimeoutReason> {
        if now.saturating_duration_since(self.opened_at) >= self.lifetime {
            return Some(TimeoutReason::KeepAlive);
        }
        match self.waiting_since {
            Some(since) if now.saturating_duration_since(since) >= self.response_timeout => {
                Some(TimeoutReason::NoResponse)
            }
            _ => None,
        }
    }

    /// Earliest instant at which [`has_timed_out`](Self::has_timed_out) can
    /// start returning a reason.
    pub fn deadline(&self) -> Instant {
        let keep_alive = self.opened_at + self.lifetime;
        match self.waiting_since {
            Some(since) => keep_alive.min(since + self.response_timeout),
            None => keep_alive,
        }
    }
}
