//! Dedicated writer task for a connection's outbound bytes.
//!
//! Every producer on a connection (handler responses, server pushes) hands its
//! body to a bounded mpsc queue; a single writer task drains the queue and is
//! the only place that writes to the socket, so bytes hit the wire strictly in
//! enqueue order.
//!
//! # Architecture
//!
//! ```text
//! Handler 1 ─┐
//! Handler 2 ─┼─► mpsc::Sender<Bytes> (bounded) ─► Writer Task ─► Socket
//! Push    N ─┘
//! ```
//!
//! - **Backpressure**: when the queue is full, `send` waits. There is no
//!   timeout; a stalled peer is detected by the reader's idle timeout.
//! - **Shutdown sentinel**: a zero-length body ends the loop without writing.
//! - **Deadline**: each batch must be written within the write timeout.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{FramewireError, Result};
use crate::protocol::{LengthCodec, LengthHeader};

/// Default outbound queue capacity (pending bodies).
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Default deadline for one socket write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum bodies to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A body ready to be written, with its encoded length header.
#[derive(Debug)]
struct OutboundFrame {
    header: LengthHeader,
    body: Bytes,
}

impl OutboundFrame {
    #[inline]
    fn size(&self) -> usize {
        self.header.as_bytes().len() + self.body.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Capacity of the outbound queue.
    pub queue_capacity: usize,
    /// Deadline for writing one batch to the socket.
    pub write_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Handle for queueing bodies on the writer task.
///
/// This is cheaply cloneable and shared by every producer on a connection.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Queue a body (protocol id + payload) for writing.
    ///
    /// Waits while the queue is full. An empty body is ignored, since an
    /// empty entry on the queue means shutdown.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the writer task has exited.
    pub async fn send(&self, body: Bytes) -> Result<()> {
        if body.is_empty() {
            return Ok(());
        }

        let permit = self
            .tx
            .reserve()
            .await
            .map_err(|_| FramewireError::ConnectionClosed)?;
        self.pending.fetch_add(1, Ordering::AcqRel);
        permit.send(body);
        Ok(())
    }

    /// Queue the shutdown sentinel without waiting.
    ///
    /// Returns `false` if the queue is full or the writer is gone.
    pub fn try_shutdown(&self) -> bool {
        self.tx.try_send(Bytes::new()).is_ok()
    }

    /// Queue the shutdown sentinel, waiting for queue space.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Bytes::new()).await;
    }

    /// Number of bodies queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Check if the queue is full, i.e. producers would wait.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.tx.capacity() == 0
    }

    /// Check if the writer task has exited.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for queueing bodies.
///
/// The JoinHandle resolves when the loop exits: `Ok(())` on sentinel or when
/// every handle is dropped, `Err` on a write failure or deadline.
pub fn spawn_writer_task<W>(
    writer: W,
    codec: LengthCodec,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
    };

    let task = tokio::spawn(writer_loop(rx, writer, codec, pending, config.write_timeout));

    (handle, task)
}

/// Main writer loop - drains the queue onto the socket.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Bytes>,
    mut writer: W,
    codec: LengthCodec,
    pending: Arc<AtomicUsize>,
    write_timeout: Duration,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(body) => body,
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        let mut stop = first.is_empty();
        if !stop {
            batch.push(encode(&codec, first)?);
        }

        while !stop && batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(body) if body.is_empty() => stop = true,
                Ok(body) => batch.push(encode(&codec, body)?),
                Err(_) => break,
            }
        }

        if !batch.is_empty() {
            let batch_size = batch.len();
            match tokio::time::timeout(write_timeout, write_batch(&mut writer, &batch)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(FramewireError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "write deadline exceeded",
                    )))
                }
            }
            pending.fetch_sub(batch_size, Ordering::Release);
        }

        if stop {
            tracing::trace!("writer received shutdown sentinel");
            let _ = writer.shutdown().await;
            return Ok(());
        }
    }
}

fn encode(codec: &LengthCodec, body: Bytes) -> Result<OutboundFrame> {
    Ok(OutboundFrame {
        header: codec.encode_length(body.len())?,
        body,
    })
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(FramewireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data not yet written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        for part in [frame.header.as_bytes(), &frame.body[..]] {
            let end = offset + part.len();
            if skip_bytes < end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&part[start..]));
            }
            offset = end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_body, ByteOrder, FrameBuffer};
    use tokio::io::{duplex, AsyncReadExt};

    fn codec() -> LengthCodec {
        LengthCodec::new(4, ByteOrder::Big).unwrap()
    }

    fn frame(body: &'static [u8]) -> OutboundFrame {
        encode(&codec(), Bytes::from_static(body)).unwrap()
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.write_timeout, DEFAULT_WRITE_TIMEOUT);
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![frame(b"hello")];
        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), 4);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_build_remaining_slices_partial_header() {
        let batch = vec![frame(b"hello")];
        let slices = build_remaining_slices(&batch, 3);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), 1);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_build_remaining_slices_into_second_frame() {
        let batch = vec![frame(b"ab"), frame(b"cdef")];
        let slices = build_remaining_slices(&batch, 4 + 2 + 1);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), 3);
        assert_eq!(slices[1].len(), 4);
    }

    #[tokio::test]
    async fn test_write_batch_layout() {
        let mut out = std::io::Cursor::new(Vec::new());
        write_batch(&mut out, &[frame(b"\x00\x01hi"), frame(b"\x00\x02")])
            .await
            .unwrap();

        assert_eq!(
            out.into_inner(),
            vec![0, 0, 0, 4, 0, 1, b'h', b'i', 0, 0, 0, 2, 0, 2]
        );
    }

    #[tokio::test]
    async fn test_send_writes_in_enqueue_order() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, codec(), WriterConfig::default());

        for id in 1u16..=10 {
            let body = build_body(&codec(), id, &id.to_be_bytes());
            handle.send(Bytes::from(body)).await.unwrap();
        }

        let mut decoder = FrameBuffer::new(codec(), 6000);
        let mut frames = Vec::new();
        let mut buf = vec![0u8; 1024];
        while frames.len() < 10 {
            let n = server.read(&mut buf).await.unwrap();
            assert!(n > 0);
            frames.extend(decoder.push(&buf[..n]).unwrap());
        }

        let ids: Vec<u16> = frames.iter().map(|f| f.protocol_id()).collect();
        assert_eq!(ids, (1u16..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_empty_send_is_noop() {
        let (client, _server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, codec(), WriterConfig::default());

        handle.send(Bytes::new()).await.unwrap();
        assert_eq!(handle.pending_count(), 0);
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn test_sentinel_stops_without_writing() {
        let (client, mut server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, codec(), WriterConfig::default());

        assert!(handle.try_shutdown());
        assert!(task.await.unwrap().is_ok());

        // Writer half was shut down and dropped: peer sees EOF, no bytes.
        let mut buf = Vec::new();
        let n = server.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        assert!(matches!(
            handle.send(Bytes::from_static(b"\x00\x01x")).await,
            Err(FramewireError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_bodies_before_sentinel_are_flushed() {
        let (client, mut server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, codec(), WriterConfig::default());

        handle.send(Bytes::from_static(b"\x00\x01a")).await.unwrap();
        handle.shutdown().await;
        task.await.unwrap().unwrap();

        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, vec![0, 0, 0, 3, 0, 1, b'a']);
    }

    #[tokio::test]
    async fn test_backpressure_blocks_when_full() {
        // Tiny pipe, nobody reading: the writer stalls and the queue fills.
        let (client, _server) = duplex(8);
        let config = WriterConfig {
            queue_capacity: 2,
            write_timeout: Duration::from_secs(60),
        };
        let (handle, _task) = spawn_writer_task(client, codec(), config);

        let mut blocked = false;
        for _ in 0..16 {
            let attempt = tokio::time::timeout(
                Duration::from_millis(100),
                handle.send(Bytes::from_static(b"\x00\x01payload")),
            )
            .await;
            if attempt.is_err() {
                blocked = true;
                break;
            }
        }
        assert!(blocked, "send should wait once the queue is full");
        assert!(handle.is_backpressure_active());
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, codec(), WriterConfig::default());

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }
}
