//! Codec module - payload serialization helpers.
//!
//! The framing layer treats payloads as opaque bytes. Handlers and push
//! objects that carry structured data use [`MsgPackCodec`].

mod msgpack;

pub use msgpack::MsgPackCodec;
