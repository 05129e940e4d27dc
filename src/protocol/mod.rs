//! Protocol module - length headers, framing, and frame types.
//!
//! This module implements the wire format:
//! - 1/2/4/8-byte length header in a configured byte order
//! - 2-byte protocol id at the start of every body
//! - Frame buffer for decoding a stream on the peer side

mod frame;
mod frame_buffer;
mod length;

pub use frame::{build_body, build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use length::{
    ByteOrder, HeaderLength, LengthCodec, LengthHeader, MAX_HEADER_SIZE, PROTOCOL_ID_SIZE,
};
