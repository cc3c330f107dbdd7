//! Connection lifecycle states as defined in RFC 6455 Section 7.

/// WebSocket connection state.
///
/// A connection starts `Open` once the upgrade completed, moves to `Closing`
/// when either side sent or received a Close frame, and ends `Closed` when
/// the transport is shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectionState {
    /// Connection is open and ready for data transfer.
    #[default]
    Open = 0,
    /// Close handshake in progress.
    Closing = 1,
    /// Transport shut down. Terminal.
    Closed = 2,
}

impl ConnectionState {
    /// Raw value, for storage in an atomic.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`as_u8`](Self::as_u8). Unknown values map to `Closed`.
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Open,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    /// Returns `true` until the transport is shut down.
    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, ConnectionState::Closed)
    }

    /// Data messages may only be sent while `Open`.
    #[inline]
    #[must_use]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}
