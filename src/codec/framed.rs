use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::Frame;
use crate::protocol::validation::FrameValidator;

const READ_CHUNK: usize = 4096;

/// Server side frame codec over an async byte stream.
///
/// Incoming frames must be masked; outgoing frames never are.
pub struct WebSocketCodec<T> {
    io: T,
    read_buf: BytesMut,
    write_buf: Vec<u8>,
    validator: FrameValidator,
    /// The frame at the head of `read_buf` already passed admission.
    admitted: bool,
}

impl<T> WebSocketCodec<T> {
    #[must_use]
    pub fn new(io: T, validator: FrameValidator) -> Self {
        Self {
            io,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: Vec::with_capacity(READ_CHUNK),
            validator,
            admitted: false,
        }
    }

    /// Seed the read buffer with bytes that arrived together with the
    /// upgrade request.
    pub fn extend_read_buffer(&mut self, data: &[u8]) {
        self.read_buf.extend_from_slice(data);
    }

    #[must_use]
    pub fn get_ref(&self) -> &T {
        &self.io
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> WebSocketCodec<T> {
    /// Read the next frame.
    ///
    /// Cancel safe: bytes already read stay buffered, so a `select!` branch
    /// dropping this future loses nothing.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` on EOF, including mid-frame
    /// - any decoding error of [`Frame::parse`]
    pub async fn read_frame(&mut self) -> Result<Frame> {
        self.read_frame_with(|| Ok(())).await
    }

    /// Read the next frame, calling `admit` once per frame as soon as its
    /// first two header bytes are buffered and before the payload is read.
    ///
    /// Cancel safe like [`read_frame`](Self::read_frame). A frame that was
    /// admitted is not admitted again when the read resumes.
    ///
    /// # Errors
    ///
    /// Same as [`read_frame`](Self::read_frame), plus any error returned by
    /// `admit`. After an error the buffered input is discarded.
    pub async fn read_frame_with<F>(&mut self, mut admit: F) -> Result<Frame>
    where
        F: FnMut() -> Result<()>,
    {
        loop {
            if !self.admitted && self.read_buf.len() >= 2 {
                if let Err(e) = admit() {
                    self.read_buf.clear();
                    return Err(e);
                }
                self.admitted = true;
            }
            match Frame::parse(&self.read_buf, &self.validator) {
                Ok((frame, consumed)) => {
                    self.read_buf.advance(consumed);
                    self.admitted = false;
                    return Ok(frame);
                }
                Err(Error::IncompleteFrame { needed }) => {
                    self.read_buf.reserve(needed.max(READ_CHUNK));
                }
                Err(e) => {
                    self.read_buf.clear();
                    self.admitted = false;
                    return Err(e);
                }
            }

            let n = self.io.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Encode and write a frame, unmasked.
    ///
    /// # Errors
    ///
    /// Fails if the frame breaks the control frame constraints or the write
    /// fails.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        frame.validate()?;
        self.write_buf.clear();
        self.write_buf.resize(frame.wire_size(false), 0);
        let written = frame.write(&mut self.write_buf, None)?;
        self.io.write_all(&self.write_buf[..written]).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.io.flush().await?;
        Ok(())
    }

    /// Shut down the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }

    /// Discard incoming bytes until EOF, an error, or `limit` elapses.
    pub async fn drain(&mut self, limit: Duration) {
        let drain = async {
            let mut scratch = [0u8; READ_CHUNK];
            while let Ok(n) = self.io.read(&mut scratch).await {
                if n == 0 {
                    break;
                }
            }
        };
        let _ = tokio::time::timeout(limit, drain).await;
        self.read_buf.clear();
        self.admitted = false;
    }
}
