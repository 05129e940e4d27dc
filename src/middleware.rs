//! Middleware pipeline - six ordered hook chains.
//!
//! | Chain      | Fires when                                   | Signature                          |
//! |------------|----------------------------------------------|------------------------------------|
//! | `closed`   | the reader loop of a connection exits        | `Fn()`                             |
//! | `recover`  | a dispatch panics, a handler fails, a send is rejected, or the config is bad | `Fn(&Fault)` |
//! | `reader`   | an inbound payload is about to be dispatched | `Fn(u16, BytesMut) -> BytesMut`    |
//! | `writer`   | an outbound payload is about to be queued    | `Fn(u16, BytesMut) -> BytesMut`    |
//! | `request`  | a handler was built and is about to execute  | `Fn(u16, &dyn Handler)`            |
//! | `push`     | a push object is about to be encoded         | `Fn(u16, &dyn Push)`               |
//!
//! Hooks run in registration order. A pipeline is assembled during setup
//! (server-wide, then extended per connection by the accept callback) and is
//! immutable once the connection loops start, so hooks are shared across
//! connections and must tolerate concurrent calls.

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;

use crate::error::FramewireError;
use crate::handler::{Handler, Push};

/// Hook fired once when a connection's reader loop ends.
pub type ClosedHook = Arc<dyn Fn() + Send + Sync>;
/// Hook receiving every fault raised on a connection.
pub type RecoverHook = Arc<dyn Fn(&Fault) + Send + Sync>;
/// Hook rewriting an inbound or outbound payload.
pub type TransformHook = Arc<dyn Fn(u16, BytesMut) -> BytesMut + Send + Sync>;
/// Hook observing a freshly built request handler.
pub type RequestHook = Arc<dyn Fn(u16, &dyn Handler) + Send + Sync>;
/// Hook observing a push object before it is encoded.
pub type PushHook = Arc<dyn Fn(u16, &dyn Push) + Send + Sync>;

/// A fault delivered to the recover chain.
#[derive(Debug)]
pub struct Fault {
    /// What went wrong.
    pub error: FramewireError,
    /// Captured stack trace for panics; empty otherwise.
    pub stack: String,
    /// Protocol id being processed, when known.
    pub protocol_id: Option<u16>,
}

impl Fault {
    /// A fault with no stack trace.
    pub fn new(error: FramewireError) -> Self {
        Self {
            error,
            stack: String::new(),
            protocol_id: None,
        }
    }

    /// A fault carrying a stack trace.
    pub fn with_stack(error: FramewireError, stack: impl Into<String>) -> Self {
        Self {
            error,
            stack: stack.into(),
            protocol_id: None,
        }
    }

    /// Tag the fault with the protocol id being processed.
    pub fn for_protocol(mut self, protocol_id: u16) -> Self {
        self.protocol_id = Some(protocol_id);
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol_id {
            Some(id) => write!(f, "protocol {}: {}", id, self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

/// Ordered hook chains shared by the connections of a server.
#[derive(Clone, Default)]
pub struct Middleware {
    closed: Vec<ClosedHook>,
    recover: Vec<RecoverHook>,
    reader: Vec<TransformHook>,
    writer: Vec<TransformHook>,
    request: Vec<RequestHook>,
    push: Vec<PushHook>,
}

impl Middleware {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a connection-closed hook.
    pub fn on_closed<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.closed.push(Arc::new(hook));
        self
    }

    /// Append a recover hook.
    pub fn on_recover<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&Fault) + Send + Sync + 'static,
    {
        self.recover.push(Arc::new(hook));
        self
    }

    /// Append an inbound transform hook.
    pub fn on_read<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(u16, BytesMut) -> BytesMut + Send + Sync + 'static,
    {
        self.reader.push(Arc::new(hook));
        self
    }

    /// Append an outbound transform hook.
    pub fn on_write<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(u16, BytesMut) -> BytesMut + Send + Sync + 'static,
    {
        self.writer.push(Arc::new(hook));
        self
    }

    /// Append a request-observed hook.
    pub fn on_request<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(u16, &dyn Handler) + Send + Sync + 'static,
    {
        self.request.push(Arc::new(hook));
        self
    }

    /// Append a push-observed hook.
    pub fn on_push<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(u16, &dyn Push) + Send + Sync + 'static,
    {
        self.push.push(Arc::new(hook));
        self
    }

    pub(crate) fn fire_closed(&self) {
        for hook in &self.closed {
            hook();
        }
    }

    pub(crate) fn fire_recover(&self, fault: &Fault) {
        for hook in &self.recover {
            hook(fault);
        }
    }

    pub(crate) fn transform_read(&self, protocol_id: u16, mut buf: BytesMut) -> BytesMut {
        for hook in &self.reader {
            buf = hook(protocol_id, buf);
        }
        buf
    }

    pub(crate) fn transform_write(&self, protocol_id: u16, mut buf: BytesMut) -> BytesMut {
        for hook in &self.writer {
            buf = hook(protocol_id, buf);
        }
        buf
    }

    pub(crate) fn fire_request(&self, protocol_id: u16, handler: &dyn Handler) {
        for hook in &self.request {
            hook(protocol_id, handler);
        }
    }

    pub(crate) fn fire_push(&self, protocol_id: u16, push: &dyn Push) {
        for hook in &self.push {
            hook(protocol_id, push);
        }
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware")
            .field("closed", &self.closed.len())
            .field("recover", &self.recover.len())
            .field("reader", &self.reader.len())
            .field("writer", &self.writer.len())
            .field("request", &self.request.len())
            .field("push", &self.push.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_transform_hooks_run_in_order() {
        let mut middleware = Middleware::new();
        middleware
            .on_read(|_, mut buf| {
                buf.extend_from_slice(b"-a");
                buf
            })
            .on_read(|_, mut buf| {
                buf.extend_from_slice(b"-b");
                buf
            });

        let out = middleware.transform_read(1, BytesMut::from(&b"x"[..]));
        assert_eq!(&out[..], b"x-a-b");
    }

    #[test]
    fn test_transform_receives_protocol_id() {
        let mut middleware = Middleware::new();
        middleware.on_write(|id, mut buf| {
            buf.extend_from_slice(&id.to_be_bytes());
            buf
        });

        let out = middleware.transform_write(0x0102, BytesMut::new());
        assert_eq!(&out[..], &[0x01, 0x02]);
    }

    #[test]
    fn test_no_hooks_is_identity() {
        let middleware = Middleware::new();
        let out = middleware.transform_read(1, BytesMut::from(&b"same"[..]));
        assert_eq!(&out[..], b"same");
    }

    #[test]
    fn test_closed_and_recover_hooks_fire() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut middleware = Middleware::new();

        let closed_log = log.clone();
        middleware.on_closed(move || closed_log.lock().push("closed".to_string()));
        let recover_log = log.clone();
        middleware.on_recover(move |fault| recover_log.lock().push(fault.to_string()));

        middleware.fire_closed();
        middleware.fire_recover(&Fault::new(FramewireError::handler("boom")).for_protocol(3));

        assert_eq!(
            *log.lock(),
            vec!["closed".to_string(), "protocol 3: Handler error: boom".to_string()]
        );
    }

    #[test]
    fn test_clone_extends_independently() {
        let mut base = Middleware::new();
        base.on_closed(|| {});

        let mut per_conn = base.clone();
        per_conn.on_closed(|| {});

        assert_eq!(base.closed.len(), 1);
        assert_eq!(per_conn.closed.len(), 2);
    }

    #[test]
    fn test_fault_with_stack() {
        let fault = Fault::with_stack(FramewireError::Panic("bad".into()), "frame 0");
        assert_eq!(fault.stack, "frame 0");
        assert!(fault.protocol_id.is_none());
        assert_eq!(fault.to_string(), "bad");
    }
}
