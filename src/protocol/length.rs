//! Length header and protocol id encoding.
//!
//! Every message on the stream is laid out as:
//! ```text
//! ┌──────────────────┬─────────────┬──────────────────┐
//! │ Length header    │ Protocol ID │ Payload          │
//! │ 1/2/4/8 bytes    │ 2 bytes     │ length - 2 bytes │
//! └──────────────────┴─────────────┴──────────────────┘
//! ```
//!
//! The header width is configurable; the protocol id is always 2 bytes.
//! Both use the configured byte order. The length counts the body
//! (protocol id + payload), not the header itself.

use serde::Deserialize;

use crate::error::{FramewireError, Result};

/// Size of the protocol id at the start of every body.
pub const PROTOCOL_ID_SIZE: usize = 2;

/// Widest supported length header.
pub const MAX_HEADER_SIZE: usize = 8;

/// Byte order of the length header and the protocol id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Network order.
    #[default]
    Big,
    /// Little endian.
    Little,
}

/// Supported length header widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderLength {
    /// `u8` header.
    One,
    /// `u16` header.
    Two,
    /// `u32` header.
    Four,
    /// `u64` header.
    Eight,
}

impl HeaderLength {
    /// Number of bytes on the wire.
    #[inline]
    pub fn width(self) -> usize {
        match self {
            HeaderLength::One => 1,
            HeaderLength::Two => 2,
            HeaderLength::Four => 4,
            HeaderLength::Eight => 8,
        }
    }

    /// Largest body length this width can express.
    #[inline]
    pub fn max_length(self) -> u64 {
        match self {
            HeaderLength::One => u8::MAX as u64,
            HeaderLength::Two => u16::MAX as u64,
            HeaderLength::Four => u32::MAX as u64,
            HeaderLength::Eight => u64::MAX,
        }
    }
}

impl TryFrom<u8> for HeaderLength {
    type Error = FramewireError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(HeaderLength::One),
            2 => Ok(HeaderLength::Two),
            4 => Ok(HeaderLength::Four),
            8 => Ok(HeaderLength::Eight),
            other => Err(FramewireError::InvalidHeaderLength(other)),
        }
    }
}

/// An encoded length header (up to 8 bytes, stored inline).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthHeader {
    buf: [u8; MAX_HEADER_SIZE],
    len: usize,
}

impl LengthHeader {
    /// The encoded header bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl AsRef<[u8]> for LengthHeader {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Encodes and decodes length headers and protocol ids for one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthCodec {
    width: HeaderLength,
    order: ByteOrder,
}

impl LengthCodec {
    /// Build a codec from a raw header length.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHeaderLength` unless `header_length` is 1, 2, 4 or 8.
    pub fn new(header_length: u8, order: ByteOrder) -> Result<Self> {
        Ok(Self {
            width: HeaderLength::try_from(header_length)?,
            order,
        })
    }

    /// Header width in bytes.
    #[inline]
    pub fn header_len(&self) -> usize {
        self.width.width()
    }

    /// Configured byte order.
    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Largest body length the header can express.
    #[inline]
    pub fn max_length(&self) -> u64 {
        self.width.max_length()
    }

    /// Decode a length header.
    ///
    /// Returns `None` unless `buf` is exactly `header_len()` bytes.
    pub fn decode_length(&self, buf: &[u8]) -> Option<u64> {
        if buf.len() != self.header_len() {
            return None;
        }

        let value = match (self.width, self.order) {
            (HeaderLength::One, _) => buf[0] as u64,
            (HeaderLength::Two, ByteOrder::Big) => u16::from_be_bytes([buf[0], buf[1]]) as u64,
            (HeaderLength::Two, ByteOrder::Little) => u16::from_le_bytes([buf[0], buf[1]]) as u64,
            (HeaderLength::Four, ByteOrder::Big) => {
                u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as u64
            }
            (HeaderLength::Four, ByteOrder::Little) => {
                u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as u64
            }
            (HeaderLength::Eight, order) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(buf);
                match order {
                    ByteOrder::Big => u64::from_be_bytes(raw),
                    ByteOrder::Little => u64::from_le_bytes(raw),
                }
            }
        };

        Some(value)
    }

    /// Encode a body length into a header.
    ///
    /// # Errors
    ///
    /// Returns `PayloadTooLarge` if `len` does not fit the header width.
    pub fn encode_length(&self, len: usize) -> Result<LengthHeader> {
        if len as u64 > self.max_length() {
            return Err(FramewireError::PayloadTooLarge {
                len,
                max: usize::try_from(self.max_length()).unwrap_or(usize::MAX),
            });
        }

        let mut buf = [0u8; MAX_HEADER_SIZE];
        let width = self.header_len();
        match (self.width, self.order) {
            (HeaderLength::One, _) => buf[0] = len as u8,
            (HeaderLength::Two, ByteOrder::Big) => {
                buf[..2].copy_from_slice(&(len as u16).to_be_bytes())
            }
            (HeaderLength::Two, ByteOrder::Little) => {
                buf[..2].copy_from_slice(&(len as u16).to_le_bytes())
            }
            (HeaderLength::Four, ByteOrder::Big) => {
                buf[..4].copy_from_slice(&(len as u32).to_be_bytes())
            }
            (HeaderLength::Four, ByteOrder::Little) => {
                buf[..4].copy_from_slice(&(len as u32).to_le_bytes())
            }
            (HeaderLength::Eight, ByteOrder::Big) => buf.copy_from_slice(&(len as u64).to_be_bytes()),
            (HeaderLength::Eight, ByteOrder::Little) => {
                buf.copy_from_slice(&(len as u64).to_le_bytes())
            }
        }

        Ok(LengthHeader { buf, len: width })
    }

    /// Read the protocol id from the first two bytes of a body.
    ///
    /// Returns `None` if the body is shorter than two bytes.
    #[inline]
    pub fn decode_protocol_id(&self, body: &[u8]) -> Option<u16> {
        let raw = [*body.first()?, *body.get(1)?];
        Some(match self.order {
            ByteOrder::Big => u16::from_be_bytes(raw),
            ByteOrder::Little => u16::from_le_bytes(raw),
        })
    }

    /// Encode a protocol id.
    #[inline]
    pub fn encode_protocol_id(&self, id: u16) -> [u8; PROTOCOL_ID_SIZE] {
        match self.order {
            ByteOrder::Big => id.to_be_bytes(),
            ByteOrder::Little => id.to_le_bytes(),
        }
    }
}
