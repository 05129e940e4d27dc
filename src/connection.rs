//! Connection lifecycle: reader loop, dispatch, and the outbound send path.
//!
//! Each accepted stream is split in two. The write half goes to a dedicated
//! writer task (see [`crate::writer`]); the read half is driven by a reader
//! task that parses length-prefixed bodies and spawns one dispatch task per
//! message:
//!
//! ```text
//!            ┌─► dispatch(body 1) ─┐
//! reader ────┼─► dispatch(body 2) ─┼─► WriterHandle ─► writer task ─► socket
//!            └─► dispatch(body N) ─┘        ▲
//!                                  push ────┘
//! ```
//!
//! Dispatch tasks are independent, so handlers may complete out of arrival
//! order. A panic or error inside one dispatch is reported to the recover
//! hooks and does not affect the connection.

use std::backtrace::Backtrace;
use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{watch, Semaphore};

use crate::attach::Attachments;
use crate::config::Opt;
use crate::error::{FramewireError, Result};
use crate::handler::{ProtocolRegistry, Push, PushContext, RequestContext};
use crate::middleware::{Fault, Middleware};
use crate::panic_trace::{self, Traced};
use crate::protocol::{LengthCodec, MAX_HEADER_SIZE, PROTOCOL_ID_SIZE};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Handle to a live connection.
///
/// Cheap to clone; every clone refers to the same connection. Handlers get
/// one through [`RequestContext::connection`], and the accept callback gets
/// one before the loops start.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Shared>,
}

struct Shared {
    peer: SocketAddr,
    codec: LengthCodec,
    max_body: usize,
    attachments: Attachments,
    writer: WriterHandle,
    middleware: RwLock<Arc<Middleware>>,
    close_tx: Arc<watch::Sender<bool>>,
    finished_tx: watch::Sender<bool>,
}

impl Connection {
    /// Start serving `stream`.
    ///
    /// Spawns the writer and reader tasks. Before the reader starts,
    /// `on_accept` receives the connection and a private copy of
    /// `middleware` it may extend; the copy is frozen afterwards.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHeaderLength` if `opt` names an unsupported header
    /// width. The recover and closed hooks of `middleware` fire and the
    /// stream is dropped.
    pub fn spawn<S, F>(
        stream: S,
        peer: SocketAddr,
        opt: &Opt,
        registry: Arc<ProtocolRegistry>,
        middleware: &Middleware,
        on_accept: F,
    ) -> Result<Connection>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        F: FnOnce(&Connection, &mut Middleware),
    {
        let codec = match opt.codec() {
            Ok(codec) => codec,
            Err(e) => {
                tracing::error!(peer = %peer, error = %e, "rejecting connection");
                middleware.fire_recover(&Fault::new(FramewireError::InvalidHeaderLength(
                    opt.header_length,
                )));
                middleware.fire_closed();
                return Err(e);
            }
        };

        panic_trace::install_hook();

        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, codec, opt.writer_config());
        let (close_tx, _) = watch::channel(false);
        let (finished_tx, _) = watch::channel(false);

        let conn = Connection {
            inner: Arc::new(Shared {
                peer,
                codec,
                max_body: opt.max_body(&codec),
                attachments: Attachments::new(),
                writer,
                middleware: RwLock::new(Arc::new(middleware.clone())),
                close_tx: Arc::new(close_tx),
                finished_tx,
            }),
        };

        // A dead writer ends the reader too.
        let close_signal = conn.inner.close_tx.clone();
        tokio::spawn(async move {
            match writer_task.await {
                Ok(Ok(())) => tracing::trace!(peer = %peer, "writer stopped"),
                Ok(Err(e)) => tracing::debug!(peer = %peer, error = %e, "writer failed"),
                Err(e) => tracing::error!(peer = %peer, error = %e, "writer task aborted"),
            }
            close_signal.send_replace(true);
        });

        let mut pipeline = middleware.clone();
        on_accept(&conn, &mut pipeline);
        *conn.inner.middleware.write() = Arc::new(pipeline);

        let limiter = match opt.max_concurrent_dispatch {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        tracing::debug!(peer = %peer, "connection started");
        tokio::spawn(read_loop(
            read_half,
            conn.clone(),
            registry,
            opt.idle_timeout(),
            limiter,
        ));

        Ok(conn)
    }

    /// Remote address of the peer.
    #[inline]
    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    /// The connection's attachment store.
    #[inline]
    pub fn attachments(&self) -> &Attachments {
        &self.inner.attachments
    }

    /// Attach an object keyed by its type.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateAttachment` if the type is already attached.
    pub fn attach<T>(&self, value: Arc<T>) -> Result<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner.attachments.attach(value)
    }

    /// Attach an object under `name`, replacing any previous entry.
    pub fn attach_named<T>(&self, name: impl Into<String>, value: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner.attachments.attach_named(name, value)
    }

    /// Send a server-initiated message.
    ///
    /// Fires the push hooks, lets `push` encode itself, runs the write
    /// hooks and queues the result.
    ///
    /// # Errors
    ///
    /// `EmptyPayload` if nothing was encoded, the first encoding error the
    /// push recorded, `PayloadTooLarge` if the body exceeds the maximum, or
    /// `ConnectionClosed`.
    pub async fn push(&self, push: &dyn Push) -> Result<()> {
        let protocol_id = push.protocol_id();
        let middleware = self.middleware();

        middleware.fire_push(protocol_id, push);
        let mut ctx = PushContext::new(protocol_id, self.clone());
        push.encode(&mut ctx);
        let payload = ctx.finish()?;

        let payload = middleware.transform_write(protocol_id, payload);
        self.send(&middleware, protocol_id, payload).await
    }

    /// Run the write hooks over `payload` and queue it.
    pub(crate) async fn respond(&self, protocol_id: u16, payload: BytesMut) -> Result<()> {
        let middleware = self.middleware();
        let payload = middleware.transform_write(protocol_id, payload);
        self.send(&middleware, protocol_id, payload).await
    }

    /// Prefix the protocol id and queue the body.
    ///
    /// An empty payload is skipped. An oversized body is reported to the
    /// recover hooks and rejected; the connection stays open.
    async fn send(&self, middleware: &Middleware, protocol_id: u16, payload: BytesMut) -> Result<()> {
        if payload.is_empty() {
            tracing::trace!(protocol_id, "skipping empty payload");
            return Ok(());
        }

        let len = PROTOCOL_ID_SIZE + payload.len();
        let max = self.inner.max_body;
        if len > max {
            tracing::warn!(protocol_id, len, max, "outbound body too large");
            middleware.fire_recover(
                &Fault::new(FramewireError::PayloadTooLarge { len, max }).for_protocol(protocol_id),
            );
            return Err(FramewireError::PayloadTooLarge { len, max });
        }

        let mut body = BytesMut::with_capacity(len);
        body.put_slice(&self.inner.codec.encode_protocol_id(protocol_id));
        body.put_slice(&payload);
        self.inner.writer.send(body.freeze()).await
    }

    /// Close the connection.
    ///
    /// Queues the shutdown sentinel behind anything already queued and stops
    /// the reader, which then fires the closed hooks. Calling it again is a
    /// no-op.
    pub fn close(&self) {
        if self.inner.close_tx.send_replace(true) {
            return;
        }
        tracing::debug!(peer = %self.inner.peer, "closing connection");
        self.inner.writer.try_shutdown();
    }

    /// Check if the connection is closing or closed.
    pub fn is_closed(&self) -> bool {
        *self.inner.close_tx.borrow() || self.inner.writer.is_closed()
    }

    /// Wait until the reader loop has exited and the closed hooks have run.
    pub async fn closed(&self) {
        let mut rx = self.inner.finished_tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Bodies queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.inner.writer.pending_count()
    }

    /// Check if the outbound queue is full.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.inner.writer.is_backpressure_active()
    }

    fn middleware(&self) -> Arc<Middleware> {
        self.inner.middleware.read().clone()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Why the reader stopped.
#[derive(Debug)]
enum ReadStop {
    /// `close` was called or the writer exited.
    Closed,
    /// Peer sent EOF, a read failed, or the idle timeout elapsed.
    Io(std::io::Error),
}

async fn close_requested(close_rx: &mut watch::Receiver<bool>) {
    let _ = close_rx.wait_for(|closed| *closed).await;
}

/// Read exactly `buf.len()` bytes within `idle`, unless the connection closes first.
async fn fill<R>(
    reader: &mut R,
    buf: &mut [u8],
    idle: Duration,
    close_rx: &mut watch::Receiver<bool>,
) -> std::result::Result<(), ReadStop>
where
    R: AsyncRead + Unpin,
{
    tokio::select! {
        biased;
        _ = close_requested(close_rx) => Err(ReadStop::Closed),
        res = tokio::time::timeout(idle, reader.read_exact(buf)) => match res {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ReadStop::Io(e)),
            Err(_) => Err(ReadStop::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "idle timeout",
            ))),
        },
    }
}

async fn read_loop<R>(
    mut reader: R,
    conn: Connection,
    registry: Arc<ProtocolRegistry>,
    idle: Duration,
    limiter: Option<Arc<Semaphore>>,
) where
    R: AsyncRead + Unpin,
{
    let peer = conn.inner.peer;
    let codec = conn.inner.codec;
    let max_body = conn.inner.max_body;
    let mut close_rx = conn.inner.close_tx.subscribe();
    let mut header = [0u8; MAX_HEADER_SIZE];
    let header = &mut header[..codec.header_len()];

    let stop = loop {
        if let Err(stop) = fill(&mut reader, header, idle, &mut close_rx).await {
            break stop;
        }

        let len = match codec.decode_length(header) {
            Some(len) if len <= max_body as u64 => len as usize,
            Some(len) => {
                tracing::warn!(peer = %peer, len, max = max_body, "inbound body too large");
                break ReadStop::Closed;
            }
            None => break ReadStop::Closed,
        };

        // Fresh buffer per message: dispatch owns it after this point.
        let mut body = BytesMut::zeroed(len);
        if let Err(stop) = fill(&mut reader, &mut body, idle, &mut close_rx).await {
            break stop;
        }

        let permit = match &limiter {
            Some(limiter) => {
                tokio::select! {
                    biased;
                    _ = close_requested(&mut close_rx) => break ReadStop::Closed,
                    permit = limiter.clone().acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break ReadStop::Closed,
                    },
                }
            }
            None => None,
        };

        let conn = conn.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            dispatch(conn, registry, body).await;
            drop(permit);
        });
    };

    match &stop {
        ReadStop::Closed => tracing::debug!(peer = %peer, "reader stopped"),
        ReadStop::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            tracing::debug!(peer = %peer, "peer disconnected")
        }
        ReadStop::Io(e) => tracing::debug!(peer = %peer, error = %e, "read failed"),
    }

    conn.inner.close_tx.send_replace(true);
    conn.middleware().fire_closed();
    conn.inner.finished_tx.send_replace(true);

    // Let the writer flush what is queued, then stop.
    conn.inner.writer.shutdown().await;
}

/// Route one body to its handler, reporting panics and errors to the recover hooks.
async fn dispatch(conn: Connection, registry: Arc<ProtocolRegistry>, body: BytesMut) {
    let middleware = conn.middleware();
    let mut current = None;

    let routed = Traced::new(route(&conn, &middleware, &registry, body, &mut current));
    let outcome = AssertUnwindSafe(routed).catch_unwind().await;

    let fault = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(e)) => Fault::new(e),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            let stack = panic_trace::take_stack()
                .unwrap_or_else(|| Backtrace::force_capture().to_string());
            tracing::error!(peer = %conn.inner.peer, protocol_id = ?current, "handler panicked: {}", message);
            Fault::with_stack(FramewireError::Panic(message), stack)
        }
    };

    let fault = match current {
        Some(id) => fault.for_protocol(id),
        None => fault,
    };
    middleware.fire_recover(&fault);
}

async fn route(
    conn: &Connection,
    middleware: &Middleware,
    registry: &ProtocolRegistry,
    mut body: BytesMut,
    current: &mut Option<u16>,
) -> Result<()> {
    let Some(protocol_id) = conn.inner.codec.decode_protocol_id(&body) else {
        tracing::debug!(peer = %conn.inner.peer, len = body.len(), "body shorter than protocol id");
        return Ok(());
    };
    *current = Some(protocol_id);
    body.advance(PROTOCOL_ID_SIZE);

    let payload = middleware.transform_read(protocol_id, body);

    let Some(factory) = registry.get(protocol_id) else {
        tracing::trace!(peer = %conn.inner.peer, protocol_id, "no handler registered");
        return Ok(());
    };

    let ctx = RequestContext::new(protocol_id, payload.freeze(), conn.clone());
    let handler = factory.build(ctx);
    middleware.fire_request(protocol_id, handler.as_ref());

    if let Err(e) = handler.execute().await {
        tracing::debug!(protocol_id, error = %e, "handler failed");
        return Err(e);
    }
    Ok(())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
