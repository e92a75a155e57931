//! One peer relationship over one socket.
//!
//! A [`Connection`] owns the stream, the inbound [`FrameBuffer`], an
//! outbound buffer for streamed frames, and the metadata the engine needs
//! (role, peer identity, session phase, last delivered type, status).
//!
//! Socket-level primitives live here; the engine operations built on them
//! (`suckin`, `process`, `bwaitfor`, ...) live in [`crate::engine`].

use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::error::{PkgError, Result};
use crate::handler::DispatchTable;
use crate::protocol::{
    encode_header, outbound_header, FrameBuffer, Message, PartialFrame, DEFAULT_MAX_PAYLOAD_SIZE,
    HEADER_SIZE,
};
use crate::transport::Stream;
use crate::writer::write_segments;

/// Default size of a single socket read.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Default outbound stream buffer size before an automatic flush.
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 32 * 1024;

/// Which side created the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepted by a listener.
    Server,
    /// Initiated by connecting to a server.
    Client,
}

/// Outcome of a read from the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were appended to the inbound buffer.
    Data(usize),
    /// Nothing available right now; the connection is still open.
    WouldBlock,
    /// The peer shut the stream down.
    Closed,
}

/// Per-connection lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Connected, handshake not yet completed.
    AwaitingHandshake,
    /// Handshake done; normal traffic.
    Established,
    /// A termination message was sent or received.
    Closing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Status {
    Open,
    Closed,
    Failed(String),
}

/// Connection tuning.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest inbound payload accepted before the stream is declared corrupt.
    pub max_payload_size: u32,
    /// Bytes requested per socket read.
    pub read_chunk_size: usize,
    /// Streamed frames are written once this many bytes are queued.
    pub stream_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
        }
    }
}

/// A PKG connection over stream `S`.
///
/// All operations take `&mut self`, so a connection is driven by one task
/// at a time. Closing consumes the connection.
pub struct Connection<S = Stream> {
    pub(crate) stream: S,
    pub(crate) role: Role,
    pub(crate) peer: String,
    pub(crate) frames: FrameBuffer,
    pub(crate) pending: Option<Message>,
    pub(crate) last_type: Option<u16>,
    pub(crate) phase: SessionPhase,
    pub(crate) table: Arc<DispatchTable>,
    status: Status,
    outbound: BytesMut,
    read_buf: Vec<u8>,
    config: ConnectionConfig,
}

impl Connection<Stream> {
    /// Wrap a connected socket, using its peer address as identity.
    pub fn from_stream(
        stream: Stream,
        role: Role,
        table: Arc<DispatchTable>,
        config: ConnectionConfig,
    ) -> Self {
        let peer = stream.peer_name();
        Self::with_config(stream, role, peer, table, config)
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a connection with default configuration.
    pub fn new(stream: S, role: Role, peer: impl Into<String>, table: Arc<DispatchTable>) -> Self {
        Self::with_config(stream, role, peer, table, ConnectionConfig::default())
    }

    /// Create a connection with custom configuration.
    pub fn with_config(
        stream: S,
        role: Role,
        peer: impl Into<String>,
        table: Arc<DispatchTable>,
        config: ConnectionConfig,
    ) -> Self {
        let read_chunk = config.read_chunk_size.max(1);
        Self {
            stream,
            role,
            peer: peer.into(),
            frames: FrameBuffer::with_capacity_and_max_payload(read_chunk, config.max_payload_size),
            pending: None,
            last_type: None,
            phase: SessionPhase::AwaitingHandshake,
            table,
            status: Status::Open,
            outbound: BytesMut::new(),
            read_buf: vec![0u8; read_chunk],
            config,
        }
    }

    /// Which side created this connection.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Peer identity.
    #[inline]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Current lifecycle phase.
    #[inline]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Type of the most recently delivered or returned message.
    #[inline]
    pub fn last_type(&self) -> Option<u16> {
        self.last_type
    }

    /// The dispatch table installed on this connection.
    #[inline]
    pub fn table(&self) -> &Arc<DispatchTable> {
        &self.table
    }

    /// Connection configuration.
    #[inline]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// True while neither EOF nor a fatal error has been seen.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == Status::Open
    }

    /// True once the peer has shut the stream down.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.status == Status::Closed
    }

    /// Reason the connection failed, if it did.
    pub fn failure(&self) -> Option<&str> {
        match &self.status {
            Status::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Inbound bytes buffered but not yet carved into messages.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.frames.len()
    }

    /// Progress on the next inbound frame.
    #[inline]
    pub fn partial(&self) -> PartialFrame {
        self.frames.partial()
    }

    /// Outbound bytes queued by `stream` and not yet written.
    #[inline]
    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    /// Message parked by `block`, if any.
    #[inline]
    pub fn peek_pending(&self) -> Option<&Message> {
        self.pending.as_ref()
    }

    /// Reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    fn ensure_open(&self) -> Result<()> {
        match &self.status {
            Status::Open => Ok(()),
            Status::Closed => Err(PkgError::ConnectionClosed),
            Status::Failed(reason) => Err(PkgError::ConnectionFailed(reason.clone())),
        }
    }

    pub(crate) fn mark_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::debug!("Connection to {} failed: {}", self.peer, reason);
        self.status = Status::Failed(reason);
    }

    fn mark_closed(&mut self) {
        if self.status == Status::Open {
            tracing::debug!("Peer {} closed the connection", self.peer);
            self.status = Status::Closed;
        }
    }

    fn record_read(&mut self, result: std::io::Result<usize>) -> Result<ReadOutcome> {
        match result {
            Ok(0) => {
                self.mark_closed();
                Ok(ReadOutcome::Closed)
            }
            Ok(n) => {
                self.frames.extend(&self.read_buf[..n]);
                Ok(ReadOutcome::Data(n))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
                ) =>
            {
                Ok(ReadOutcome::WouldBlock)
            }
            Err(e) => {
                self.mark_failed(e.to_string());
                Err(PkgError::Io(e))
            }
        }
    }

    /// Read whatever is available right now, without waiting for data.
    ///
    /// Returns [`ReadOutcome::WouldBlock`] when no bytes are ready and
    /// [`ReadOutcome::Closed`] on EOF. A would-block result yields to the
    /// runtime once, so a `suckin`/`process` loop does not starve the
    /// socket it is polling.
    pub async fn read_available(&mut self) -> Result<ReadOutcome> {
        self.ensure_open()?;

        let stream = &mut self.stream;
        let buf = &mut self.read_buf;
        let polled = poll_fn(|cx| {
            let mut read_buf = ReadBuf::new(&mut buf[..]);
            match Pin::new(&mut *stream).poll_read(cx, &mut read_buf) {
                Poll::Pending => Poll::Ready(None),
                Poll::Ready(Ok(())) => Poll::Ready(Some(Ok(read_buf.filled().len()))),
                Poll::Ready(Err(e)) => Poll::Ready(Some(Err(e))),
            }
        })
        .await;

        match polled {
            None => {
                // Let the runtime drive its I/O before the caller polls again
                tokio::task::yield_now().await;
                Ok(ReadOutcome::WouldBlock)
            }
            Some(result) => self.record_read(result),
        }
    }

    /// Wait until at least one byte arrives or the peer closes.
    ///
    /// Never returns [`ReadOutcome::WouldBlock`] except for interrupted reads.
    pub async fn read_some(&mut self) -> Result<ReadOutcome> {
        self.ensure_open()?;
        let result = self.stream.read(&mut self.read_buf).await;
        self.record_read(result)
    }

    /// Carve one complete message off the front of the inbound buffer.
    ///
    /// Returns `Ok(None)` while the next frame is incomplete. A corrupt
    /// header marks the connection failed.
    pub fn try_take_message(&mut self) -> Result<Option<Message>> {
        if let Some(msg) = self.pending.take() {
            return Ok(Some(msg));
        }
        match self.frames.try_take_message() {
            Ok(msg) => Ok(msg),
            Err(e) => {
                if self.failure().is_none() {
                    self.mark_failed(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Write segments after any streamed frames, keeping FIFO order.
    async fn write_frame(&mut self, segments: &[&[u8]]) -> Result<()> {
        let mut all: Vec<&[u8]> = Vec::with_capacity(segments.len() + 1);
        all.push(&self.outbound);
        all.extend_from_slice(segments);

        match write_segments(&mut self.stream, &all).await {
            Ok(_) => {
                self.outbound.clear();
                Ok(())
            }
            Err(e) => {
                self.mark_failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Send one message, retrying short writes until the frame is out.
    ///
    /// Frames queued by [`stream`](Self::stream) go first. Returns the
    /// number of payload bytes sent.
    pub async fn send(&mut self, msg_type: u16, payload: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        let header = encode_header(&outbound_header(msg_type, payload.len())?);

        self.write_frame(&[&header, payload]).await?;
        tracing::debug!("Sent message type {} ({} bytes) to {}", msg_type, payload.len(), self.peer);
        Ok(payload.len())
    }

    /// Send one message whose payload is `first` followed by `second`.
    ///
    /// Both parts go out in one gather write without being copied together.
    pub async fn send2(&mut self, msg_type: u16, first: &[u8], second: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        let total = first.len() + second.len();
        let header = encode_header(&outbound_header(msg_type, total)?);

        self.write_frame(&[&header, first, second]).await?;
        tracing::debug!("Sent message type {} ({} bytes, 2 parts) to {}", msg_type, total, self.peer);
        Ok(total)
    }

    /// Queue a message without writing it yet.
    ///
    /// The queue is written when it reaches the configured stream buffer
    /// size, and by [`flush`](Self::flush), [`send`](Self::send) and `close`.
    pub async fn stream(&mut self, msg_type: u16, payload: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        let header = outbound_header(msg_type, payload.len())?;

        self.outbound.reserve(HEADER_SIZE + payload.len());
        self.outbound.extend_from_slice(&encode_header(&header));
        self.outbound.extend_from_slice(payload);

        if self.outbound.len() >= self.config.stream_buffer_size {
            self.flush().await?;
        }
        Ok(payload.len())
    }

    /// Write every queued frame. Returns the number of bytes written.
    pub async fn flush(&mut self) -> Result<usize> {
        if self.outbound.is_empty() {
            return Ok(0);
        }
        self.ensure_open()?;
        let queued = self.outbound.len();
        self.write_frame(&[]).await?;
        Ok(queued)
    }

    /// Close the connection, releasing the socket and all buffers.
    ///
    /// Queued frames are flushed first if the connection is still open.
    /// The connection is consumed, so it cannot be closed twice.
    pub async fn close(mut self) -> Result<()> {
        let mut result = Ok(());

        if self.is_open() {
            if let Err(e) = self.flush().await {
                result = Err(e);
            }
        }
        if let Err(e) = self.stream.shutdown().await {
            // The peer may already be gone; only report it if nothing failed before.
            if result.is_ok() && self.is_open() {
                result = Err(PkgError::Io(e));
            }
        }

        tracing::debug!("Closed connection to {}", self.peer);
        result
    }
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("peer", &self.peer)
            .field("phase", &self.phase)
            .field("status", &self.status)
            .field("last_type", &self.last_type)
            .field("buffered", &self.frames.len())
            .field("queued", &self.outbound.len())
            .finish()
    }
}
