//! Data messages and close codes.

use crate::error::{Error, Result};
use crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD;
use crate::protocol::{Frame, OpCode};

/// WebSocket close status code.
///
/// Covers the RFC 6455 registry plus the application codes used by the
/// notification bus in the 4000-4999 range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000).
    #[default]
    Normal,
    /// Going away (1001). Endpoint is going away, e.g. server shutdown.
    GoingAway,
    /// Protocol error (1002).
    ProtocolError,
    /// Incorrect data (1003). Endpoint received a data type it cannot accept.
    IncorrectData,
    /// No status received (1005). Never sent on the wire.
    NoStatusReceived,
    /// Abnormal closure (1006). Never sent on the wire, means "tear down now".
    AbnormalClosure,
    /// Inconsistent data (1007), e.g. non UTF-8 text.
    InconsistentData,
    /// Policy violation (1008).
    PolicyViolation,
    /// Message too big (1009).
    MessageTooBig,
    /// Extension negotiation failed (1010).
    ExtensionNegotiationFailed,
    /// Server error (1011).
    ServerError,
    /// Service restart (1012).
    Restart,
    /// Try again later (1013).
    TryLater,
    /// Bad gateway (1014).
    BadGateway,
    /// TLS handshake failure (1015). Never sent on the wire.
    TlsHandshake,
    /// Application code kept for future use (4000).
    Reserved,
    /// The session behind the connection expired (4001).
    SessionExpired,
    /// The connection outlived its keep-alive budget (4002).
    KeepAliveTimeout,
    /// Tear the connection down without a closing handshake (4003).
    KillNow,
    /// Any other code, e.g. application codes in 3000-4999.
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::IncorrectData,
            1005 => CloseCode::NoStatusReceived,
            1006 => CloseCode::AbnormalClosure,
            1007 => CloseCode::InconsistentData,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::ExtensionNegotiationFailed,
            1011 => CloseCode::ServerError,
            1012 => CloseCode::Restart,
            1013 => CloseCode::TryLater,
            1014 => CloseCode::BadGateway,
            1015 => CloseCode::TlsHandshake,
            4000 => CloseCode::Reserved,
            4001 => CloseCode::SessionExpired,
            4002 => CloseCode::KeepAliveTimeout,
            4003 => CloseCode::KillNow,
            other => CloseCode::Other(other),
        }
    }

    /// Get the numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::IncorrectData => 1003,
            CloseCode::NoStatusReceived => 1005,
            CloseCode::AbnormalClosure => 1006,
            CloseCode::InconsistentData => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::ExtensionNegotiationFailed => 1010,
            CloseCode::ServerError => 1011,
            CloseCode::Restart => 1012,
            CloseCode::TryLater => 1013,
            CloseCode::BadGateway => 1014,
            CloseCode::TlsHandshake => 1015,
            CloseCode::Reserved => 4000,
            CloseCode::SessionExpired => 4001,
            CloseCode::KeepAliveTimeout => 4002,
            CloseCode::KillNow => 4003,
            CloseCode::Other(code) => *code,
        }
    }

    /// Check if this code may be carried by a Close frame.
    ///
    /// Valid codes:
    /// - 1000-1003 and 1007-1014: registered codes an endpoint may send
    /// - 3000-4999: reserved for libraries and applications, known or not
    ///
    /// 1004-1006 and 1015 are reserved and MUST NOT be set in a Close frame.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self.as_u16(), 1000..=1003 | 1007..=1014 | 3000..=4999)
    }

    /// Check if the transport may be torn down right after our Close frame
    /// without waiting for the peer's acknowledgment.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        matches!(
            self,
            CloseCode::Normal | CloseCode::GoingAway | CloseCode::Restart
        )
    }

    /// Check if this code skips the closing handshake entirely.
    #[must_use]
    pub const fn is_abrupt(&self) -> bool {
        matches!(self, CloseCode::AbnormalClosure | CloseCode::KillNow)
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Maximum length of a close reason: control payload minus the 2-byte code.
pub const MAX_CLOSE_REASON: usize = MAX_CONTROL_FRAME_PAYLOAD - 2;

/// Close frame containing status code and optional reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close status code.
    pub code: CloseCode,
    /// Human-readable reason for closing (UTF-8, max 123 bytes).
    pub reason: String,
}

impl CloseFrame {
    /// Create a close frame, rejecting codes that may not go on the wire.
    ///
    /// Reasons longer than [`MAX_CLOSE_REASON`] bytes are truncated on a
    /// character boundary.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCloseCode` if the code is neither a sendable
    /// standard code nor in the 3000-4999 application range.
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Result<Self> {
        if !code.is_valid() {
            return Err(Error::InvalidCloseCode(code.as_u16()));
        }
        let mut reason = reason.into();
        if reason.len() > MAX_CLOSE_REASON {
            let mut end = MAX_CLOSE_REASON;
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            reason.truncate(end);
        }
        Ok(Self { code, reason })
    }

    /// Decode the payload of a received Close frame.
    ///
    /// An empty payload carries no status and yields `None`.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a 1-byte payload
    /// - `Error::InvalidUtf8` if the reason is not UTF-8
    pub fn parse(payload: &[u8]) -> Result<Option<(u16, String)>> {
        match payload.len() {
            0 => Ok(None),
            1 => Err(Error::ProtocolViolation("Malformed closing frame".into())),
            _ => {
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                let reason = std::str::from_utf8(&payload[2..])?.to_owned();
                Ok(Some((code, reason)))
            }
        }
    }

    /// Encode this close frame as a wire frame.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        Frame::close(Some(self.code.as_u16()), &self.reason)
    }
}

/// A complete data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A text message (UTF-8 encoded).
    Text(String),
    /// A binary message (arbitrary bytes).
    Binary(Vec<u8>),
}

impl Message {
    /// Create a text message.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(s.into())
    }

    /// Create a binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Message::Binary(data.into())
    }

    /// Check if this is a text message.
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Get the message payload as bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match self {
            Message::Text(s) => s.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    /// Get the text content, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(s) => Some(s),
            Message::Binary(_) => None,
        }
    }
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(s) => Frame::new(true, OpCode::Text, s.into_bytes()),
            Message::Binary(data) => Frame::new(true, OpCode::Binary, data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_roundtrip() {
        for code in [1000u16, 1001, 1002, 1003, 1006, 1007, 1011, 1012, 1013, 4000, 4001, 4002, 4003] {
            assert_eq!(CloseCode::from_u16(code).as_u16(), code);
        }
        assert_eq!(CloseCode::from_u16(3500), CloseCode::Other(3500));
    }

    #[test]
    fn test_close_code_validity() {
        assert!(CloseCode::Normal.is_valid());
        assert!(CloseCode::TryLater.is_valid());
        assert!(CloseCode::SessionExpired.is_valid());
        assert!(CloseCode::Other(3000).is_valid());
        assert!(CloseCode::Other(4999).is_valid());
        assert!(!CloseCode::AbnormalClosure.is_valid());
        assert!(!CloseCode::NoStatusReceived.is_valid());
        assert!(!CloseCode::TlsHandshake.is_valid());
        assert!(!CloseCode::Other(2000).is_valid());
        assert!(!CloseCode::Other(5000).is_valid());
        assert!(!CloseCode::Other(999).is_valid());
    }

    #[test]
    fn test_clean_codes() {
        assert!(CloseCode::Normal.is_clean());
        assert!(CloseCode::GoingAway.is_clean());
        assert!(CloseCode::Restart.is_clean());
        assert!(!CloseCode::ProtocolError.is_clean());
        assert!(!CloseCode::SessionExpired.is_clean());
    }

    #[test]
    fn test_close_frame_rejects_invalid_code() {
        assert_eq!(
            CloseFrame::new(CloseCode::Other(2500), ""),
            Err(Error::InvalidCloseCode(2500))
        );
        assert!(CloseFrame::new(CloseCode::Other(3999), "app").is_ok());
    }

    #[test]
    fn test_close_frame_truncates_reason() {
        let reason = "é".repeat(100);
        let frame = CloseFrame::new(CloseCode::ProtocolError, reason).unwrap();
        assert!(frame.reason.len() <= MAX_CLOSE_REASON);
        assert!(frame.to_frame().payload().len() <= MAX_CONTROL_FRAME_PAYLOAD);
    }

    #[test]
    fn test_close_frame_parse() {
        assert_eq!(CloseFrame::parse(&[]).unwrap(), None);
        assert!(matches!(
            CloseFrame::parse(&[0x03]),
            Err(Error::ProtocolViolation(_))
        ));
        assert_eq!(
            CloseFrame::parse(&[0x03, 0xe8, b'b', b'y', b'e']).unwrap(),
            Some((1000, "bye".to_string()))
        );
        assert_eq!(
            CloseFrame::parse(&[0x03, 0xe8, 0xff]),
            Err(Error::InvalidUtf8)
        );
    }

    #[test]
    fn test_message_into_frame() {
        let frame = Frame::from(Message::text("hi"));
        assert_eq!(frame.opcode, OpCode::Text);
        assert!(frame.fin);
        assert_eq!(frame.payload(), b"hi");
    }
}
