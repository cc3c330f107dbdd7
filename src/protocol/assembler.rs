//! Reassembly of fragmented messages (RFC 6455 Section 5.4).

use bytes::BytesMut;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::{Frame, OpCode};

/// Reassembles fragmented data frames into complete messages.
///
/// Control frames may arrive between fragments; they are not buffered and do
/// not disturb an ongoing reassembly.
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    opcode: Option<OpCode>,
    limits: Limits,
}

impl MessageAssembler {
    /// Create an assembler enforcing `limits` on the total message size.
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: BytesMut::new(),
            opcode: None,
            limits,
        }
    }

    /// Add a data frame to the message being assembled.
    ///
    /// Returns `Some(message)` once a frame with FIN=1 completes it. Control
    /// frames are ignored and return `None`.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a continuation outside a message, or a
    ///   new data frame while a message is still incomplete
    /// - `Error::MessageTooLarge` if the message exceeds the size limit
    /// - `Error::InvalidUtf8` if a completed text message is not valid UTF-8
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        if frame.opcode.is_control() {
            return Ok(None);
        }

        if frame.opcode == OpCode::Continuation {
            if self.opcode.is_none() {
                return Err(Error::ProtocolViolation(
                    "Unexpected continuation frame".into(),
                ));
            }
        } else if self.opcode.is_some() {
            return Err(Error::ProtocolViolation(
                "Expected continuation frame".into(),
            ));
        } else if frame.fin {
            // Unfragmented message, no copy through the buffer.
            self.limits.check_message_size(frame.payload().len())?;
            return Self::finish(frame.opcode, frame.into_payload()).map(Some);
        } else {
            self.opcode = Some(frame.opcode);
        }

        let new_size = self.buffer.len() + frame.payload().len();
        if let Err(err) = self.limits.check_message_size(new_size) {
            self.reset();
            return Err(err);
        }
        self.buffer.extend_from_slice(frame.payload());

        if !frame.fin {
            return Ok(None);
        }

        let payload = self.buffer.split().to_vec();
        match self.opcode.take() {
            Some(opcode) => Self::finish(opcode, payload).map(Some),
            None => Err(Error::Internal("reassembly lost its opcode".into())),
        }
    }

    /// Whether a fragmented message is in progress.
    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    /// Discard any partial message.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.opcode = None;
    }

    fn finish(opcode: OpCode, payload: Vec<u8>) -> Result<Message> {
        match opcode {
            OpCode::Text => Ok(Message::Text(String::from_utf8(payload)?)),
            _ => Ok(Message::Binary(payload)),
        }
    }
}
