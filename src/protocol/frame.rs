//! WebSocket frame parsing and serialization (RFC 6455).

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::{apply_mask, apply_mask_fast};
use crate::protocol::validation::FrameValidator;

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// A WebSocket frame.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
/// |     Extended payload length continued, if payload len == 127  |
/// + - - - - - - - - - - - - - - - +-------------------------------+
/// |                               |Masking-key, if MASK set to 1  |
/// +-------------------------------+-------------------------------+
/// | Masking-key (continued)       |          Payload Data         |
/// +-------------------------------- - - - - - - - - - - - - - - - +
/// :                     Payload Data continued ...                :
/// +---------------------------------------------------------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bit 1.
    pub rsv1: bool,
    /// Reserved bit 2.
    pub rsv2: bool,
    /// Reserved bit 3.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame with cleared reserved bits.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            payload,
        }
    }

    /// Create a final text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Create a final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Create a close frame with optional status code and reason.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let payload = match code {
            Some(code) => {
                let mut data = code.to_be_bytes().to_vec();
                data.extend_from_slice(reason.as_bytes());
                data
            }
            None => Vec::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Get the payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Parse one client frame from the front of `buf`.
    ///
    /// Returns the frame, unmasked, and the number of bytes consumed. The
    /// header is validated as soon as it is available so an oversized frame
    /// is rejected before its body is buffered.
    ///
    /// ## Errors
    ///
    /// - `Error::IncompleteFrame` if more bytes are needed
    /// - `Error::ReservedOpcode` / `Error::InvalidOpcode` for unknown opcodes
    /// - any header violation reported by [`FrameValidator`]
    pub fn parse(buf: &[u8], validator: &FrameValidator) -> Result<(Self, usize)> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }

        let byte0 = buf[0];
        let byte1 = buf[1];
        let fin = (byte0 & 0x80) != 0;
        let rsv = [(byte0 & 0x40) != 0, (byte0 & 0x20) != 0, (byte0 & 0x10) != 0];
        let opcode = OpCode::from_u8(byte0 & 0x0F)?;
        let masked = (byte1 & 0x80) != 0;
        let short_len = byte1 & 0x7F;

        validator.validate_header(fin, rsv, opcode, masked, short_len)?;

        let (payload_len, mut offset) = match short_len {
            0..=125 => (u64::from(short_len), 2),
            126 => {
                if buf.len() < 4 {
                    return Err(Error::IncompleteFrame {
                        needed: 4 - buf.len(),
                    });
                }
                (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
            }
            _ => {
                if buf.len() < 10 {
                    return Err(Error::IncompleteFrame {
                        needed: 10 - buf.len(),
                    });
                }
                let mut len = [0u8; 8];
                len.copy_from_slice(&buf[2..10]);
                (u64::from_be_bytes(len), 10)
            }
        };

        validator.validate_length(payload_len)?;
        // Bounded by the message size limit, so it fits in usize.
        let payload_len = payload_len as usize;

        let total = offset + 4 + payload_len;
        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let mask = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;

        let mut payload = buf[offset..total].to_vec();
        apply_mask_fast(&mut payload, mask);

        let frame = Frame {
            fin,
            rsv1: rsv[0],
            rsv2: rsv[1],
            rsv3: rsv[2],
            opcode,
            payload,
        };
        Ok((frame, total))
    }

    /// Check the control frame constraints.
    ///
    /// # Errors
    ///
    /// - `Error::FragmentedControlFrame` if a control frame has FIN=0
    /// - `Error::ControlFrameTooLarge` if a control frame payload is > 125 bytes
    pub fn validate(&self) -> Result<()> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload.len()));
            }
        }
        Ok(())
    }

    /// Write the frame to a buffer and return the number of bytes written.
    ///
    /// Server frames are written with `mask = None`; a mask is only used to
    /// produce client frames, e.g. in tests.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` if the buffer is too small.
    pub fn write(&self, buf: &mut [u8], mask: Option<[u8; 4]>) -> Result<usize> {
        let payload_len = self.payload.len();
        let total_size = self.wire_size(mask.is_some());
        if buf.len() < total_size {
            return Err(Error::InvalidState(format!(
                "Buffer too small: need {} bytes, have {}",
                total_size,
                buf.len()
            )));
        }

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= 0x80;
        }
        if self.rsv1 {
            byte0 |= 0x40;
        }
        if self.rsv2 {
            byte0 |= 0x20;
        }
        if self.rsv3 {
            byte0 |= 0x10;
        }
        buf[0] = byte0;

        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        let mut offset = 2;
        if payload_len < 126 {
            buf[1] = mask_bit | payload_len as u8;
        } else if payload_len < 65536 {
            buf[1] = mask_bit | 126;
            buf[2..4].copy_from_slice(&(payload_len as u16).to_be_bytes());
            offset = 4;
        } else {
            buf[1] = mask_bit | 127;
            buf[2..10].copy_from_slice(&(payload_len as u64).to_be_bytes());
            offset = 10;
        }

        if let Some(key) = mask {
            buf[offset..offset + 4].copy_from_slice(&key);
            offset += 4;
        }

        buf[offset..offset + payload_len].copy_from_slice(&self.payload);
        if let Some(key) = mask {
            apply_mask(&mut buf[offset..offset + payload_len], key);
        }

        Ok(total_size)
    }

    /// Encode a server frame (never masked) after checking the control
    /// frame constraints.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Frame::validate`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.validate()?;
        let mut buf = vec![0u8; self.wire_size(false)];
        self.write(&mut buf, None)?;
        Ok(buf)
    }

    /// Calculate the size needed to write this frame.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let payload_len = self.payload.len();
        let extended_len_size = if payload_len < 126 {
            0
        } else if payload_len < 65536 {
            2
        } else {
            8
        };
        let mask_size = if masked { 4 } else { 0 };
        2 + extended_len_size + mask_size + payload_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;

    const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    fn validator() -> FrameValidator {
        FrameValidator::default()
    }

    fn client_bytes(frame: &Frame) -> Vec<u8> {
        let mut buf = vec![0u8; frame.wire_size(true)];
        frame.write(&mut buf, Some(MASK)).unwrap();
        buf
    }

    #[test]
    fn test_parse_masked_text_frame() {
        // RFC 6455 Section 5.7: a single-frame masked text message
        let data = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let (frame, consumed) = Frame::parse(&data, &validator()).unwrap();
        assert_eq!(consumed, data.len());
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload(), b"Hello");
    }

    #[test]
    fn test_parse_unmasked_frame_fails() {
        let data = [0x81, 0x05, b'H', b'e', b'l', b'l', b'o'];
        assert_eq!(
            Frame::parse(&data, &validator()),
            Err(Error::UnmaskedClientFrame)
        );
    }

    #[test]
    fn test_parse_reserved_opcode_fails() {
        let data = [0x83, 0x80, 0, 0, 0, 0];
        assert_eq!(Frame::parse(&data, &validator()), Err(Error::ReservedOpcode(0x3)));
    }

    #[test]
    fn test_parse_reserved_bits_fail() {
        let data = [0xC1, 0x80, 0, 0, 0, 0];
        assert_eq!(Frame::parse(&data, &validator()), Err(Error::ReservedBitsSet));
    }

    #[test]
    fn test_parse_fragmented_ping_fails() {
        let data = [0x09, 0x80, 0, 0, 0, 0];
        assert_eq!(
            Frame::parse(&data, &validator()),
            Err(Error::FragmentedControlFrame)
        );
    }

    #[test]
    fn test_parse_control_frame_with_extended_length_fails() {
        // Only the 2-byte header is needed to reject it.
        let data = [0x89, 0xFE];
        assert_eq!(
            Frame::parse(&data, &validator()),
            Err(Error::ControlFrameTooLarge(126))
        );
    }

    #[test]
    fn test_oversized_payload_rejected_before_body() {
        let validator = FrameValidator::new(Limits::new(1000));
        // Declares 2000 bytes but carries none of them.
        let data = [0x82, 0xFE, 0x07, 0xD0];
        assert_eq!(
            Frame::parse(&data, &validator),
            Err(Error::PayloadTooLarge {
                size: 2000,
                max: 1000
            })
        );
    }

    #[test]
    fn test_parse_64bit_length_too_large() {
        let mut data = vec![0x82, 0xFF];
        data.extend_from_slice(&u64::MAX.to_be_bytes());
        assert!(matches!(
            Frame::parse(&data, &validator()),
            Err(Error::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_parse_incomplete() {
        assert_eq!(
            Frame::parse(&[0x81], &validator()),
            Err(Error::IncompleteFrame { needed: 1 })
        );
        let full = client_bytes(&Frame::text("Hello"));
        assert!(matches!(
            Frame::parse(&full[..full.len() - 1], &validator()),
            Err(Error::IncompleteFrame { needed: 1 })
        ));
    }

    #[test]
    fn test_length_encodings_roundtrip() {
        for len in [0usize, 1, 125, 126, 65535, 65536] {
            let frame = Frame::binary(vec![0x5A; len]);
            let bytes = client_bytes(&frame);
            let (parsed, consumed) = Frame::parse(&bytes, &validator()).unwrap();
            assert_eq!(consumed, bytes.len());
            assert_eq!(parsed, frame, "length {len}");
        }
    }

    #[test]
    fn test_encode_server_frame_is_unmasked() {
        let bytes = Frame::text("Hi").encode().unwrap();
        assert_eq!(bytes, vec![0x81, 0x02, b'H', b'i']);

        let bytes = Frame::binary(vec![0; 300]).encode().unwrap();
        assert_eq!(&bytes[..4], &[0x82, 126, 0x01, 0x2C]);

        let bytes = Frame::binary(vec![0; 70_000]).encode().unwrap();
        assert_eq!(bytes[1], 127);
        assert_eq!(&bytes[2..10], &70_000u64.to_be_bytes());
    }

    #[test]
    fn test_encode_rejects_oversized_control_frame() {
        assert_eq!(
            Frame::ping(vec![0; 126]).encode(),
            Err(Error::ControlFrameTooLarge(126))
        );
        assert_eq!(
            Frame::new(false, OpCode::Pong, Vec::new()).encode(),
            Err(Error::FragmentedControlFrame)
        );
    }

    #[test]
    fn test_close_frame_payload() {
        let frame = Frame::close(Some(1000), "bye");
        assert_eq!(frame.payload(), &[0x03, 0xe8, b'b', b'y', b'e']);
        assert!(Frame::close(None, "").payload().is_empty());
    }

    #[test]
    fn test_write_buffer_too_small() {
        let mut buf = [0u8; 3];
        assert!(matches!(
            Frame::text("Hello").write(&mut buf, None),
            Err(Error::InvalidState(_))
        ));
    }
}
