//! Error types for the WebSocket transport.
//!
//! Every failure that can end a connection is an [`Error`] variant, and
//! [`Error::close_code`] is the one place where an error kind is mapped to the
//! close code sent to the peer. Handshake failures happen before a connection
//! exists and are reported as HTTP responses through [`HandshakeError`].

use thiserror::Error;

use crate::message::CloseCode;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while a WebSocket connection is running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Invalid opcode value.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Reserved bits set, no extension is ever negotiated.
    #[error("Reserved bits must be unset")]
    ReservedBitsSet,

    /// Unmasked client frame.
    #[error("Frame must be masked")]
    UnmaskedClientFrame,

    /// Control frame fragmented.
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Close code outside the standard set and the application range.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Declared frame payload exceeds the maximum message size.
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge {
        /// Declared payload length.
        size: u64,
        /// Maximum allowed size.
        max: usize,
    },

    /// Reassembled message exceeds the maximum message size.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Size of the message so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Invalid UTF-8 in a text message or close reason.
    #[error("Invalid UTF-8 in text payload")]
    InvalidUtf8,

    /// Incomplete frame data in the read buffer.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// The peer closed the transport without a closing handshake.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// The peer sends frames faster than the rate limit allows.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// No pooled resource could be acquired after bounded retries.
    #[error("Failed to acquire a pooled resource after {attempts} attempts")]
    PoolExhausted {
        /// Number of attempts made.
        attempts: usize,
    },

    /// The session behind the connection expired or was invalidated.
    #[error("Session expired")]
    SessionExpired,

    /// Operation forbidden in the current connection state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed application envelope.
    #[error("Invalid websocket request: {0}")]
    InvalidRequest(String),

    /// The notification store failed.
    #[error("Notification store error: {0}")]
    Store(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Invalid WebSocket handshake.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}

impl Error {
    /// Close code reported to the peer when this error ends a connection.
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            Error::ConnectionClosed | Error::Io(_) | Error::IncompleteFrame { .. } => {
                CloseCode::AbnormalClosure
            }
            Error::ProtocolViolation(_)
            | Error::ReservedOpcode(_)
            | Error::InvalidOpcode(_)
            | Error::ReservedBitsSet
            | Error::UnmaskedClientFrame
            | Error::FragmentedControlFrame
            | Error::ControlFrameTooLarge(_)
            | Error::InvalidCloseCode(_)
            | Error::Handshake(_) => CloseCode::ProtocolError,
            Error::InvalidUtf8 => CloseCode::InconsistentData,
            Error::PayloadTooLarge { .. } | Error::MessageTooLarge { .. } => {
                CloseCode::MessageTooBig
            }
            Error::RateLimitExceeded | Error::PoolExhausted { .. } => CloseCode::TryLater,
            Error::SessionExpired => CloseCode::SessionExpired,
            Error::InvalidState(_)
            | Error::InvalidRequest(_)
            | Error::Store(_)
            | Error::Internal(_) => CloseCode::ServerError,
        }
    }

    /// Reason sent along with [`close_code`](Self::close_code).
    ///
    /// Server errors never leak their detail to the peer.
    #[must_use]
    pub fn close_reason(&self) -> Option<String> {
        match self.close_code() {
            CloseCode::ServerError => None,
            _ => Some(self.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            _ => Error::Io(err.to_string()),
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_: std::string::FromUtf8Error) -> Self {
        Error::InvalidUtf8
    }
}

/// Failures of the HTTP upgrade negotiation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Missing or malformed upgrade headers.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The client asked for a protocol version the server does not speak.
    #[error("Upgrade required: supported versions are {}", supported.join(", "))]
    UpgradeRequired {
        /// Versions the server supports, reported in `Sec-WebSocket-Version`.
        supported: Vec<String>,
    },
}

impl HandshakeError {
    /// HTTP status code of the error response.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            HandshakeError::BadRequest(_) => 400,
            HandshakeError::UpgradeRequired { .. } => 426,
        }
    }

    /// Write the HTTP error response to a buffer.
    pub fn write_response(&self, buf: &mut Vec<u8>) {
        match self {
            HandshakeError::BadRequest(_) => {
                buf.extend_from_slice(b"HTTP/1.1 400 Bad Request\r\n");
            }
            HandshakeError::UpgradeRequired { supported } => {
                buf.extend_from_slice(b"HTTP/1.1 426 Upgrade Required\r\n");
                buf.extend_from_slice(
                    format!("Sec-WebSocket-Version: {}\r\n", supported.join(", ")).as_bytes(),
                );
            }
        }
        let body = self.to_string();
        buf.extend_from_slice(b"Content-Type: text/plain; charset=utf-8\r\n");
        buf.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        buf.extend_from_slice(b"Connection: close\r\n\r\n");
        buf.extend_from_slice(body.as_bytes());
    }
}
