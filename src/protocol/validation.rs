//! Header validation for incoming client frames.
//!
//! Checks run in wire order so a bad frame is rejected as soon as the bytes
//! that prove it bad have arrived, and before any payload is buffered:
//! reserved bits, masking, control frame constraints, then the declared
//! payload length against the message size limit.

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD;

/// Validator for frames received by the server.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    limits: Limits,
}

impl FrameValidator {
    /// Create a new frame validator.
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    /// Validate the fixed 2-byte header.
    ///
    /// `short_len` is the 7-bit length field, so a control frame announcing
    /// an extended length (126 or 127) fails here as well.
    ///
    /// # Errors
    ///
    /// - `Error::ReservedBitsSet` - RSV bits set, no extension is negotiated
    /// - `Error::UnmaskedClientFrame` - client frames must be masked
    /// - `Error::FragmentedControlFrame` - control frame with FIN=0
    /// - `Error::ControlFrameTooLarge` - control frame payload above 125 bytes
    pub fn validate_header(
        &self,
        fin: bool,
        rsv: [bool; 3],
        opcode: OpCode,
        masked: bool,
        short_len: u8,
    ) -> Result<()> {
        if rsv.iter().any(|&bit| bit) {
            return Err(Error::ReservedBitsSet);
        }
        if !masked {
            return Err(Error::UnmaskedClientFrame);
        }
        if opcode.is_control() {
            if !fin {
                return Err(Error::FragmentedControlFrame);
            }
            if usize::from(short_len) > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(usize::from(short_len)));
            }
        }
        Ok(())
    }

    /// Validate the full payload length before the body is read.
    ///
    /// # Errors
    ///
    /// Returns `Error::PayloadTooLarge` above the maximum message size.
    pub fn validate_length(&self, payload_len: u64) -> Result<()> {
        self.limits.check_payload_size(payload_len)
    }

    /// Maximum message size enforced by this validator.
    pub fn max_message_size(&self) -> usize {
        self.limits.max_message_size
    }
}

impl Default for FrameValidator {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_RSV: [bool; 3] = [false, false, false];

    fn validator() -> FrameValidator {
        FrameValidator::new(Limits::new(1024))
    }

    #[test]
    fn test_accepts_masked_data_frame() {
        assert!(validator()
            .validate_header(true, NO_RSV, OpCode::Text, true, 5)
            .is_ok());
    }

    #[test]
    fn test_rejects_reserved_bits() {
        for rsv in [[true, false, false], [false, true, false], [false, false, true]] {
            assert_eq!(
                validator().validate_header(true, rsv, OpCode::Text, true, 0),
                Err(Error::ReservedBitsSet)
            );
        }
    }

    #[test]
    fn test_rejects_unmasked() {
        assert_eq!(
            validator().validate_header(true, NO_RSV, OpCode::Binary, false, 3),
            Err(Error::UnmaskedClientFrame)
        );
    }

    #[test]
    fn test_control_frame_constraints() {
        assert_eq!(
            validator().validate_header(false, NO_RSV, OpCode::Ping, true, 0),
            Err(Error::FragmentedControlFrame)
        );
        assert_eq!(
            validator().validate_header(true, NO_RSV, OpCode::Close, true, 126),
            Err(Error::ControlFrameTooLarge(126))
        );
        assert!(validator()
            .validate_header(true, NO_RSV, OpCode::Pong, true, 125)
            .is_ok());
    }

    #[test]
    fn test_fragmented_data_frame_allowed() {
        assert!(validator()
            .validate_header(false, NO_RSV, OpCode::Text, true, 10)
            .is_ok());
    }

    #[test]
    fn test_validate_length() {
        assert!(validator().validate_length(1024).is_ok());
        assert_eq!(
            validator().validate_length(1025),
            Err(Error::PayloadTooLarge {
                size: 1025,
                max: 1024
            })
        );
    }
}
