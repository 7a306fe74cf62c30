//! A single client connection as a line-oriented message channel.
//!
//! Each accepted TCP stream is split into a [`Session`] (shared handle
//! owning the write half) and a [`SessionReader`] (exclusively owned by
//! the session's receive loop). The session tracks its own open/closed
//! state with an atomic flag so close is idempotent and safe under
//! concurrent invocation: only the first caller releases the transport.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Write timeout for a single outbound line (10 seconds).
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum accepted line length (64 KiB).
const MAX_LINE_LENGTH: usize = 65_536;

/// Unique identifier for one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Errors that can occur on a single session's channel.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("write to {peer} failed: {reason}")]
    WriteFailure { peer: SocketAddr, reason: String },

    #[error("write to {peer} timed out")]
    WriteTimeout { peer: SocketAddr },

    #[error("read from {peer} failed: {reason}")]
    ReadFailure { peer: SocketAddr, reason: String },

    #[error("line from {peer} exceeds {max} bytes")]
    LineTooLong { peer: SocketAddr, max: usize },

    #[error("{id} is closed")]
    Closed { id: SessionId },
}

/// Shared handle to one connected client.
///
/// The handle is held by the session's own receive-loop task and by the
/// registry for broadcasts; `send` serializes writers through a mutex.
pub struct Session {
    /// Identity of this connection.
    id: SessionId,

    /// Remote address, for logging and notices.
    peer_addr: SocketAddr,

    /// Buffered writer for outbound lines.
    writer: Mutex<BufWriter<OwnedWriteHalf>>,

    /// Set exactly once by the first close call.
    closed: AtomicBool,

    /// Cancelled on close to unblock a pending read.
    shutdown: CancellationToken,
}

impl Session {
    /// Wraps an accepted stream, returning the shared session handle and
    /// the reader owned by the receive loop.
    pub fn from_stream(
        id: SessionId,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> (Arc<Self>, SessionReader) {
        let (read_half, write_half) = stream.into_split();

        let session = Arc::new(Self {
            id,
            peer_addr,
            writer: Mutex::new(BufWriter::new(write_half)),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        let reader = SessionReader {
            session: Arc::clone(&session),
            reader: BufReader::new(read_half),
            line: String::new(),
        };

        (session, reader)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Writes one newline-terminated line to the peer and flushes it.
    ///
    /// Any failure means the peer is gone: the caller must close the
    /// session rather than retry.
    pub async fn send(&self, text: &str) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed { id: self.id });
        }

        let mut writer = self.writer.lock().await;

        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(text.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::WriteFailure {
                peer: self.peer_addr,
                reason: e.to_string(),
            }),
            Err(_) => Err(SessionError::WriteTimeout {
                peer: self.peer_addr,
            }),
        }
    }

    /// Closes the session and releases the transport.
    ///
    /// Idempotent and safe to call concurrently: an atomic check-and-set
    /// picks exactly one closer, every later call observes "already
    /// closed" and returns success. A pending read on the paired
    /// [`SessionReader`] unblocks and terminates its sequence.
    pub async fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutdown.cancel();

        // The peer may already be gone; a failed shutdown releases the
        // socket on drop anyway.
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;

        debug!(session = %self.id, peer = %self.peer_addr, "Session closed");
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Inbound side of one session: a finite sequence of lines.
///
/// Owned exclusively by the session's receive loop.
pub struct SessionReader {
    session: Arc<Session>,
    reader: BufReader<OwnedReadHalf>,
    line: String,
}

impl SessionReader {
    /// Produces the next inbound line with its delimiter stripped.
    ///
    /// Returns `Ok(None)` when the peer closes gracefully or when the
    /// session itself is closed from another task; after an `Err` the
    /// sequence is over as well.
    pub async fn next_line(&mut self) -> Result<Option<String>, SessionError> {
        self.line.clear();

        let read = tokio::select! {
            _ = self.session.shutdown.cancelled() => return Ok(None),
            result = self.reader.read_line(&mut self.line) => result,
        };

        match read {
            Ok(0) => Ok(None),
            Ok(n) if n > MAX_LINE_LENGTH => Err(SessionError::LineTooLong {
                peer: self.session.peer_addr,
                max: MAX_LINE_LENGTH,
            }),
            Ok(_) => {
                while self.line.ends_with('\n') || self.line.ends_with('\r') {
                    self.line.pop();
                }
                Ok(Some(self.line.clone()))
            }
            Err(e) => Err(SessionError::ReadFailure {
                peer: self.session.peer_addr,
                reason: e.to_string(),
            }),
        }
    }
}
