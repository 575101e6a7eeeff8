//! Connection Session
//!
//! Each client connection is served by one [`Session`] running in its own
//! task. The session loops reading bytes, decoding frames, dispatching
//! requests and writing replies until the client goes away.
//!
//! ## Connection Lifecycle
//!
//! ```text
//!    ┌──────────────────────────────┐
//!    │  Reading                     │◄──────────────┐
//!    │  (wait for bytes / shutdown) │               │
//!    └──────────────┬───────────────┘               │
//!                   │                               │
//!                   ▼                               │
//!    ┌──────────────────────────────┐   partial     │
//!    │  Decoding                    │───────────────┤
//!    └──────────────┬───────────────┘               │
//!                   │ one Request                   │
//!                   ▼                               │
//!    ┌──────────────────────────────┐               │
//!    │  Dispatching                 │               │
//!    └──────────────┬───────────────┘               │
//!                   ▼                               │
//!    ┌──────────────────────────────┐  next frame   │
//!    │  Writing                     │───► Decoding ─┘
//!    └──────────────────────────────┘
//!
//!    EOF, I/O error, protocol error, shutdown ──► Closed
//! ```
//!
//! ## Buffer Management
//!
//! Incoming bytes accumulate in a `BytesMut`. TCP is a stream, so one read
//! may hold half a request or several of them. Complete frames are split off
//! the front; whatever remains waits for the next read.

use crate::commands::Dispatcher;
use crate::protocol::{Decoded, FrameDecoder, ProtocolError, Reply, Request};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Default limit on unprocessed input a client may buffer (1 GB, same as
/// Redis' default query buffer limit).
pub const MAX_QUERY_BUFFER: usize = 1024 * 1024 * 1024;

/// How long a reply that is being written when shutdown arrives may take
/// to finish.
const SHUTDOWN_WRITE_GRACE: Duration = Duration::from_secs(1);

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling, shared by all sessions.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Connections closed because of a malformed frame
    pub protocol_errors: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent a malformed frame
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Client disconnected between requests
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Client disconnected in the middle of a frame
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Query buffer limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,

    /// The server is shutting down
    #[error("Server shutting down")]
    Shutdown,
}

/// One client connection.
pub struct Session<S> {
    stream: BufWriter<S>,

    /// Client's address (for logging)
    peer: SocketAddr,

    /// Bytes received but not yet decoded
    buffer: BytesMut,
    max_query_buffer: usize,

    dispatcher: Dispatcher,
    decoder: FrameDecoder,
    stats: Arc<ConnectionStats>,

    /// Flips to `true` when the server shuts down
    shutdown: watch::Receiver<bool>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a session for an accepted stream.
    pub fn new(
        stream: S,
        peer: SocketAddr,
        dispatcher: Dispatcher,
        stats: Arc<ConnectionStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            stream: BufWriter::new(stream),
            peer,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            max_query_buffer: MAX_QUERY_BUFFER,
            dispatcher,
            decoder: FrameDecoder::new(),
            stats,
            shutdown,
        }
    }

    /// Sets the limit on buffered, not yet decoded input.
    pub fn with_max_query_buffer(mut self, limit: usize) -> Self {
        self.max_query_buffer = limit;
        self
    }

    /// Runs the session until the client disconnects, an error occurs, or
    /// the server shuts down.
    ///
    /// A client hanging up between requests and a server shutdown both count
    /// as a clean close and return `Ok`.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        self.stats.connection_opened();
        info!(client = %self.peer, "Client connected");

        let result = match self.main_loop().await {
            Ok(()) | Err(ConnectionError::ClientDisconnected) => {
                info!(client = %self.peer, "Client disconnected");
                Ok(())
            }
            Err(ConnectionError::Shutdown) => {
                debug!(client = %self.peer, "Closing connection for shutdown");
                Ok(())
            }
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.peer, "Connection reset by client");
                Err(ConnectionError::Io(io_err))
            }
            Err(ConnectionError::UnexpectedEof) => {
                debug!(client = %self.peer, "Client hung up mid-request");
                Err(ConnectionError::UnexpectedEof)
            }
            Err(e) => {
                warn!(client = %self.peer, error = %e, "Connection error");
                Err(e)
            }
        };

        self.stats.connection_closed();
        result
    }

    /// The read-decode-dispatch-write loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            // Answer every complete request already buffered, one at a time.
            loop {
                match self.try_decode() {
                    Ok(Some(request)) => {
                        let reply = self.dispatcher.dispatch(request);
                        self.stats.command_processed();
                        self.send_reply(&reply).await?;
                        if *self.shutdown.borrow() {
                            return Err(ConnectionError::Shutdown);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        self.stats.protocol_error();
                        let reply = Reply::error(format!("Protocol error: {}", e));
                        if let Err(write_err) = self.send_reply(&reply).await {
                            debug!(
                                client = %self.peer,
                                error = %write_err,
                                "Could not deliver protocol error"
                            );
                        }
                        return Err(ConnectionError::Protocol(e));
                    }
                }
            }

            self.read_more_data().await?;
        }
    }

    /// Attempts to split one complete request off the buffer.
    ///
    /// Empty arrays are dropped from the buffer as they are found.
    fn try_decode(&mut self) -> Result<Option<Request>, ProtocolError> {
        while !self.buffer.is_empty() {
            match self.decoder.decode_next(&self.buffer)? {
                Some(Decoded::Empty(consumed)) => {
                    self.buffer.advance(consumed);
                    trace!(client = %self.peer, "Skipped empty request");
                }
                Some(Decoded::Request(request, consumed)) => {
                    self.buffer.advance(consumed);
                    trace!(
                        client = %self.peer,
                        consumed = consumed,
                        remaining = self.buffer.len(),
                        "Decoded request"
                    );
                    return Ok(Some(request));
                }
                None => {
                    trace!(
                        client = %self.peer,
                        buffered = self.buffer.len(),
                        "Incomplete request, need more data"
                    );
                    return Ok(None);
                }
            }
        }

        Ok(None)
    }

    /// Reads more data from the stream into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= self.max_query_buffer {
            debug!(
                client = %self.peer,
                size = self.buffer.len(),
                limit = self.max_query_buffer,
                "Query buffer limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = tokio::select! {
            read = self.stream.get_mut().read_buf(&mut self.buffer) => read?,
            _ = crate::shutdown::requested(&mut self.shutdown) => {
                return Err(ConnectionError::Shutdown);
            }
        };

        if n == 0 {
            return if self.buffer.is_empty() {
                Err(ConnectionError::ClientDisconnected)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.stats.bytes_read(n);
        trace!(client = %self.peer, bytes = n, "Read data");

        Ok(())
    }

    /// Encodes and sends a reply to the client.
    ///
    /// If shutdown arrives while the reply is still being written, the write
    /// gets [`SHUTDOWN_WRITE_GRACE`] to finish before the session gives up.
    async fn send_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        let bytes = reply.encode();
        let stream = &mut self.stream;
        let write = async {
            stream.write_all(&bytes).await?;
            stream.flush().await
        };
        tokio::pin!(write);

        tokio::select! {
            written = &mut write => written?,
            _ = crate::shutdown::requested(&mut self.shutdown) => {
                match tokio::time::timeout(SHUTDOWN_WRITE_GRACE, &mut write).await {
                    Ok(written) => written?,
                    Err(_) => {
                        debug!(client = %self.peer, "Reply not drained before shutdown");
                        return Err(ConnectionError::Shutdown);
                    }
                }
            }
        }

        self.stats.bytes_written(bytes.len());
        trace!(client = %self.peer, bytes = bytes.len(), "Sent reply");
        Ok(())
    }
}

/// Runs a session to completion, logging how it ended.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    stats: Arc<ConnectionStats>,
    shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // `run` logs how the session ended
    let _ = Session::new(stream, peer, dispatcher, stats, shutdown)
        .run()
        .await;
}
