//! Frame buffer for accumulating partial reads.
//!
//! Peer-side decoder: clients, tests and tools that read a framewire stream
//! in arbitrary chunks push them here and get complete frames back.
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//!
//! # Example
//!
//! ```
//! use framewire::protocol::{build_frame, ByteOrder, FrameBuffer, LengthCodec};
//!
//! let codec = LengthCodec::new(2, ByteOrder::Big).unwrap();
//! let mut buffer = FrameBuffer::new(codec, 6000);
//!
//! let wire = build_frame(&codec, 9, b"pong").unwrap();
//! assert!(buffer.push(&wire[..3]).unwrap().is_empty());
//!
//! let frames = buffer.push(&wire[3..]).unwrap();
//! assert_eq!(frames[0].protocol_id(), 9);
//! ```

use bytes::BytesMut;

use super::length::LengthCodec;
use super::Frame;
use crate::error::{FramewireError, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for a complete length header.
    WaitingForHeader,
    /// Header parsed, waiting for the body bytes.
    WaitingForBody { len: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Header/protocol id codec.
    codec: LengthCodec,
    /// Maximum allowed body length.
    max_body: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer for the given codec and body limit.
    pub fn new(codec: LengthCodec, max_body: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            state: State::WaitingForHeader,
            codec,
            max_body,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// # Errors
    ///
    /// Returns `PayloadTooLarge` if a header declares a body above the limit,
    /// or `Protocol` if a body is too short to carry a protocol id.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.state {
                State::WaitingForHeader => {
                    let header_len = self.codec.header_len();
                    if self.buffer.len() < header_len {
                        return Ok(None);
                    }

                    let declared = self
                        .codec
                        .decode_length(&self.buffer[..header_len])
                        .ok_or_else(|| FramewireError::Protocol("short header".to_string()))?;

                    if declared > self.max_body as u64 {
                        return Err(FramewireError::PayloadTooLarge {
                            len: usize::try_from(declared).unwrap_or(usize::MAX),
                            max: self.max_body,
                        });
                    }

                    let _ = self.buffer.split_to(header_len);
                    self.state = State::WaitingForBody {
                        len: declared as usize,
                    };
                }

                State::WaitingForBody { len } => {
                    if self.buffer.len() < len {
                        return Ok(None);
                    }

                    let body = self.buffer.split_to(len).freeze();
                    self.state = State::WaitingForHeader;

                    return Frame::split(&self.codec, body).map(Some).ok_or_else(|| {
                        FramewireError::Protocol(format!(
                            "body of {} bytes cannot carry a protocol id",
                            len
                        ))
                    });
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}
