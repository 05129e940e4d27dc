//! Frame struct with typed accessors.
//!
//! Represents one decoded message: the protocol id from the first two body
//! bytes and the remaining payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use framewire::protocol::{build_frame, ByteOrder, Frame, LengthCodec};
//! use bytes::Bytes;
//!
//! let codec = LengthCodec::new(4, ByteOrder::Big).unwrap();
//! let wire = build_frame(&codec, 1, b"hiX").unwrap();
//! assert_eq!(&wire[..4], &[0, 0, 0, 5]);
//!
//! let frame = Frame::split(&codec, Bytes::copy_from_slice(&wire[4..])).unwrap();
//! assert_eq!(frame.protocol_id(), 1);
//! assert_eq!(frame.payload(), b"hiX");
//! ```

use bytes::Bytes;

use super::length::{LengthCodec, PROTOCOL_ID_SIZE};
use crate::error::Result;

/// A complete decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Protocol id selecting the handler.
    pub protocol_id: u16,
    /// Payload bytes after the protocol id.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from protocol id and payload.
    pub fn new(protocol_id: u16, payload: Bytes) -> Self {
        Self {
            protocol_id,
            payload,
        }
    }

    /// Split a body into protocol id and payload (zero-copy).
    ///
    /// Returns `None` if the body is too short to carry a protocol id.
    pub fn split(codec: &LengthCodec, mut body: Bytes) -> Option<Self> {
        let protocol_id = codec.decode_protocol_id(&body)?;
        let payload = body.split_off(PROTOCOL_ID_SIZE);
        Some(Self {
            protocol_id,
            payload,
        })
    }

    /// Get the protocol id.
    #[inline]
    pub fn protocol_id(&self) -> u16 {
        self.protocol_id
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Length of the body on the wire (protocol id + payload).
    #[inline]
    pub fn body_len(&self) -> usize {
        PROTOCOL_ID_SIZE + self.payload.len()
    }
}

/// Build a body (protocol id + payload) without the length header.
pub fn build_body(codec: &LengthCodec, protocol_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PROTOCOL_ID_SIZE + payload.len());
    buf.extend_from_slice(&codec.encode_protocol_id(protocol_id));
    buf.extend_from_slice(payload);
    buf
}

/// Build a complete wire message as a single byte vector.
///
/// # Errors
///
/// Returns `PayloadTooLarge` if the body does not fit the header width.
pub fn build_frame(codec: &LengthCodec, protocol_id: u16, payload: &[u8]) -> Result<Vec<u8>> {
    let body_len = PROTOCOL_ID_SIZE + payload.len();
    let header = codec.encode_length(body_len)?;

    let mut buf = Vec::with_capacity(codec.header_len() + body_len);
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(&codec.encode_protocol_id(protocol_id));
    buf.extend_from_slice(payload);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ByteOrder;

    fn codec() -> LengthCodec {
        LengthCodec::new(4, ByteOrder::Big).unwrap()
    }

    #[test]
    fn test_frame_creation() {
        let frame = Frame::new(7, Bytes::from_static(b"hello"));

        assert_eq!(frame.protocol_id(), 7);
        assert_eq!(frame.payload(), b"hello");
        assert_eq!(frame.body_len(), 7);
    }

    #[test]
    fn test_split_body() {
        let body = Bytes::from_static(&[0x00, 0x01, b'h', b'i', b'X']);
        let frame = Frame::split(&codec(), body).unwrap();

        assert_eq!(frame.protocol_id(), 1);
        assert_eq!(frame.payload(), b"hiX");
    }

    #[test]
    fn test_split_id_only() {
        let frame = Frame::split(&codec(), Bytes::from_static(&[0x00, 0x02])).unwrap();
        assert_eq!(frame.protocol_id(), 2);
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn test_split_too_short() {
        assert!(Frame::split(&codec(), Bytes::new()).is_none());
        assert!(Frame::split(&codec(), Bytes::from_static(&[0x01])).is_none());
    }

    #[test]
    fn test_split_is_zero_copy() {
        let body = Bytes::from_static(&[0x00, 0x01, b'a', b'b']);
        let frame = Frame::split(&codec(), body.clone()).unwrap();
        assert_eq!(frame.payload.as_ptr(), body[2..].as_ptr());
    }

    #[test]
    fn test_build_frame_layout() {
        let bytes = build_frame(&codec(), 1, b"hiX").unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 5, 0, 1, b'h', b'i', b'X']);
    }

    #[test]
    fn test_build_frame_little_endian() {
        let codec = LengthCodec::new(2, ByteOrder::Little).unwrap();
        let bytes = build_frame(&codec, 0x0102, b"").unwrap();
        assert_eq!(bytes, vec![2, 0, 0x02, 0x01]);
    }

    #[test]
    fn test_build_frame_too_large_for_header() {
        let codec = LengthCodec::new(1, ByteOrder::Big).unwrap();
        assert!(build_frame(&codec, 1, &[0u8; 254]).is_err());
        assert!(build_frame(&codec, 1, &[0u8; 253]).is_ok());
    }

    #[test]
    fn test_build_body() {
        let body = build_body(&codec(), 3, b"ok");
        assert_eq!(body, vec![0, 3, b'o', b'k']);
    }
}
