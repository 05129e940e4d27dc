//! Request and push contexts.
//!
//! A [`RequestContext`] is created for every dispatched message. It carries the
//! protocol id, the (already transformed) payload and a handle to the owning
//! connection, which is what handlers use to resolve attachments and respond.
//!
//! A [`PushContext`] is created for every server-initiated push. The push
//! object writes its serialized form into it from [`Push::encode`].
//!
//! # Example
//!
//! ```ignore
//! async fn echo(ctx: RequestContext) -> HandlerResult {
//!     ctx.respond(ctx.protocol_id(), ctx.payload()).await
//! }
//!
//! struct Notice(String);
//!
//! impl Push for Notice {
//!     fn protocol_id(&self) -> u16 { 100 }
//!     fn encode(&self, ctx: &mut PushContext) {
//!         ctx.write_msgpack(&self.0);
//!     }
//! }
//! ```

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::MsgPackCodec;
use crate::connection::Connection;
use crate::error::{FramewireError, Result};

/// A server-initiated message.
pub trait Push: Send + Sync {
    /// Protocol id the message is sent under.
    fn protocol_id(&self) -> u16;

    /// Serialize the message into `ctx`.
    ///
    /// Writing nothing makes the push fail with `EmptyPayload`.
    fn encode(&self, ctx: &mut PushContext);
}

/// Context passed to handler factories and handlers.
///
/// `RequestContext` is `Clone`; clones share the payload and the connection.
#[derive(Clone)]
pub struct RequestContext {
    protocol_id: u16,
    payload: Bytes,
    conn: Connection,
}

impl RequestContext {
    pub(crate) fn new(protocol_id: u16, payload: Bytes, conn: Connection) -> Self {
        Self {
            protocol_id,
            payload,
            conn,
        }
    }

    /// Protocol id of the inbound message.
    #[inline]
    pub fn protocol_id(&self) -> u16 {
        self.protocol_id
    }

    /// Payload after the protocol id, as rewritten by the read hooks.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as `Bytes` (cheap clone).
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    /// Decode the payload as MsgPack.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        MsgPackCodec::decode(&self.payload)
    }

    /// The connection this message arrived on.
    #[inline]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Resolve an attachment by type; `None` if nothing is attached.
    pub fn inject<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.conn.attachments().get::<T>()
    }

    /// Resolve an attachment by name; `None` if nothing matches.
    pub fn inject_named<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.conn.attachments().get_named::<T>(name)
    }

    /// Send raw payload bytes under `protocol_id`.
    ///
    /// Runs the write hooks, then queues the message. Waits while the
    /// connection's outbound queue is full.
    pub async fn respond(&self, protocol_id: u16, payload: &[u8]) -> Result<()> {
        self.conn
            .respond(protocol_id, BytesMut::from(payload))
            .await
    }

    /// Send a MsgPack-encoded value under `protocol_id`.
    pub async fn respond_msgpack<T: Serialize>(&self, protocol_id: u16, value: &T) -> Result<()> {
        let data = MsgPackCodec::encode(value)?;
        self.conn
            .respond(protocol_id, BytesMut::from(&data[..]))
            .await
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("protocol_id", &self.protocol_id)
            .field("payload_len", &self.payload.len())
            .field("peer", &self.conn.remote_addr())
            .finish()
    }
}

/// Context a [`Push`] encodes into.
pub struct PushContext {
    protocol_id: u16,
    buffer: BytesMut,
    conn: Connection,
    write_error: Option<FramewireError>,
}

impl PushContext {
    pub(crate) fn new(protocol_id: u16, conn: Connection) -> Self {
        Self {
            protocol_id,
            buffer: BytesMut::new(),
            conn,
            write_error: None,
        }
    }

    /// Protocol id of the push.
    #[inline]
    pub fn protocol_id(&self) -> u16 {
        self.protocol_id
    }

    /// The connection being pushed to.
    #[inline]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Resolve an attachment by type.
    pub fn inject<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.conn.attachments().get::<T>()
    }

    /// Resolve an attachment by name.
    pub fn inject_named<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.conn.attachments().get_named::<T>(name)
    }

    /// Append raw bytes to the payload.
    pub fn write(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Append a MsgPack-encoded value to the payload.
    ///
    /// An encoding failure drops the partial bytes and is recorded for
    /// `Connection::push`; only the first failure is kept.
    pub fn write_msgpack<T: Serialize>(&mut self, value: &T) {
        let start = self.buffer.len();
        if let Err(e) = MsgPackCodec::encode_into(value, &mut self.buffer) {
            self.buffer.truncate(start);
            self.fail(e);
        }
    }

    /// Record an encoding failure; the push will not be sent.
    pub fn fail(&mut self, error: FramewireError) {
        if self.write_error.is_none() {
            self.write_error = Some(error);
        }
    }

    /// Bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Payload, or the recorded write error.
    pub(crate) fn finish(self) -> Result<BytesMut> {
        if self.buffer.is_empty() {
            return Err(FramewireError::EmptyPayload(self.protocol_id));
        }
        match self.write_error {
            Some(e) => Err(e),
            None => Ok(self.buffer),
        }
    }
}
