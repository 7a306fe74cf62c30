//! Client library for the line chat relay.
//!
//! [`RelayClient`] wraps one TCP connection to the relay server as a
//! pair of line channels: `send` for outbound lines, [`IncomingLines`]
//! for the inbound stream. A failed initial connection is reported once
//! as an error and never retried automatically; a server that goes away
//! terminates the inbound stream rather than raising.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// Literal that the interactive client treats as a local cue to close
/// its own connection after sending. The server does not interpret it;
/// it is answered like any other line.
pub const LOCAL_SHUTDOWN_COMMAND: &str = "shutdown";

/// Errors that can occur on the client connection.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not connect to {addr}: {reason}")]
    ConnectFailure { addr: String, reason: String },

    #[error("send failed: {0}")]
    SendFailure(String),

    #[error("receive failed: {0}")]
    ReceiveFailure(String),

    #[error("connection is closed")]
    Closed,
}

/// One connection to the relay server.
pub struct RelayClient {
    peer_addr: SocketAddr,
    writer: Mutex<BufWriter<OwnedWriteHalf>>,
    closed: AtomicBool,
}

impl RelayClient {
    /// Connects to `host:port` and returns the client together with the
    /// inbound line stream.
    ///
    /// One attempt only; the caller decides whether to report or retry.
    pub async fn connect(host: &str, port: u16) -> Result<(Self, IncomingLines), ClientError> {
        let addr = format!("{host}:{port}");

        let stream =
            TcpStream::connect(&addr)
                .await
                .map_err(|e| ClientError::ConnectFailure {
                    addr: addr.clone(),
                    reason: e.to_string(),
                })?;

        let peer_addr = stream.peer_addr().map_err(|e| ClientError::ConnectFailure {
            addr,
            reason: e.to_string(),
        })?;

        let (read_half, write_half) = stream.into_split();

        debug!(peer = %peer_addr, "Connected to relay server");

        let client = Self {
            peer_addr,
            writer: Mutex::new(BufWriter::new(write_half)),
            closed: AtomicBool::new(false),
        };
        let incoming = IncomingLines {
            reader: BufReader::new(read_half),
            line: String::new(),
        };

        Ok((client, incoming))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sends one newline-terminated line to the server.
    pub async fn send(&self, text: &str) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(text.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        result.map_err(|e| ClientError::SendFailure(e.to_string()))
    }

    /// Closes the connection; idempotent and safe to call concurrently.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        debug!(peer = %self.peer_addr, "Connection closed");
    }
}

/// Inbound line stream from the server.
pub struct IncomingLines {
    reader: BufReader<OwnedReadHalf>,
    line: String,
}

impl IncomingLines {
    /// Produces the next line from the server with its delimiter
    /// stripped; `Ok(None)` when the server closes the connection.
    pub async fn next_line(&mut self) -> Result<Option<String>, ClientError> {
        self.line.clear();

        match self.reader.read_line(&mut self.line).await {
            Ok(0) => Ok(None),
            Ok(_) => {
                while self.line.ends_with('\n') || self.line.ends_with('\r') {
                    self.line.pop();
                }
                Ok(Some(self.line.clone()))
            }
            Err(e) => Err(ClientError::ReceiveFailure(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_failure_is_reported_once() {
        // Nothing listens on a freshly bound-then-dropped port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = RelayClient::connect("127.0.0.1", port).await;
        match result {
            Err(ClientError::ConnectFailure { addr, .. }) => {
                assert!(addr.contains(&port.to_string()));
            }
            other => panic!("expected ConnectFailure, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (connected, _accepted) =
            tokio::join!(RelayClient::connect("127.0.0.1", addr.port()), listener.accept());
        let (client, _incoming) = connected.unwrap();

        client.close().await;
        client.close().await; // idempotent

        assert!(client.is_closed());
        assert!(matches!(
            client.send("late").await,
            Err(ClientError::Closed)
        ));
    }
}
