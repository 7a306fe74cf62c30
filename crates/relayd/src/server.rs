//! TCP relay server: accept loop and per-session receive tasks.
//!
//! The server:
//! - Listens on a TCP socket for client connections
//! - Wraps each accepted connection in a `Session` and registers it
//! - Spawns one receive-loop task per session, fully isolated from the
//!   accept loop and from every other session
//! - Supports operator broadcast to all connected clients
//! - Shuts down gracefully via CancellationToken
//!
//! Lifecycle: `Stopped → Starting → Listening → Stopping → Stopped`.
//! Starting and Stopping are transient and happen while the lifecycle
//! lock is held, so observers only ever see Stopped or Listening.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use relay_core::reply;

use crate::event::ServerEvent;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionId, SessionReader};

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind on.
    pub bind_addr: IpAddr,

    /// TCP port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: relay_core::DEFAULT_PORT,
        }
    }
}

/// Errors that can occur in server lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {reason}")]
    BindFailure { addr: SocketAddr, reason: String },

    #[error("server is already listening")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,
}

/// Lifecycle state guarded by the server's mutex.
enum Lifecycle {
    Stopped,
    Listening {
        local_addr: SocketAddr,
        cancel: CancellationToken,
        accept_task: JoinHandle<()>,
    },
}

/// The relay server.
///
/// Owns the session registry and the event channel; `start` and `stop`
/// drive the lifecycle, `operator_broadcast` delivers an
/// operator-typed line to every connected client.
pub struct RelayServer {
    /// Live session set shared with every per-session task.
    registry: SessionRegistry,

    /// Event fan-out to the presentation layer.
    events: broadcast::Sender<ServerEvent>,

    /// Connection counter for generating session ids.
    connection_counter: Arc<AtomicU64>,

    /// Current lifecycle state.
    lifecycle: Mutex<Lifecycle>,
}

impl RelayServer {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            registry: SessionRegistry::new(events.clone()),
            events,
            connection_counter: Arc::new(AtomicU64::new(0)),
            lifecycle: Mutex::new(Lifecycle::Stopped),
        }
    }

    /// Subscribes to server events (connection and disconnection
    /// notices, received lines, lifecycle changes).
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Returns the registry handle, for diagnostics and tests.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Number of currently-registered sessions.
    pub async fn session_count(&self) -> usize {
        self.registry.len().await
    }

    /// Whether the server is currently accepting connections.
    pub async fn is_listening(&self) -> bool {
        match &*self.lifecycle.lock().await {
            Lifecycle::Listening { cancel, .. } => !cancel.is_cancelled(),
            Lifecycle::Stopped => false,
        }
    }

    /// Bound address while listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.lifecycle.lock().await {
            Lifecycle::Listening {
                local_addr, cancel, ..
            } if !cancel.is_cancelled() => Some(*local_addr),
            _ => None,
        }
    }

    /// Binds the listener and starts the accept loop in the background.
    ///
    /// Returns the bound address (useful with port 0). Calling start
    /// while already listening is a programming error and fails with
    /// [`ServerError::AlreadyRunning`]; a bind failure leaves the
    /// server stopped.
    pub async fn start(&self, config: &ServerConfig) -> Result<SocketAddr, ServerError> {
        let mut lifecycle = self.lifecycle.lock().await;

        if let Lifecycle::Listening { cancel, .. } = &*lifecycle {
            if !cancel.is_cancelled() {
                return Err(ServerError::AlreadyRunning);
            }

            // The accept loop died on a fatal error: the server is
            // effectively stopped. Reap the finished task so restart
            // works without an intervening stop(); established
            // sessions stay registered and keep running.
            if let Lifecycle::Listening { accept_task, .. } =
                std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
            {
                if let Err(e) = accept_task.await {
                    warn!(error = %e, "Accept task ended abnormally");
                }
            }
        }

        let addr = SocketAddr::new(config.bind_addr, config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailure {
                addr,
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| ServerError::BindFailure {
            addr,
            reason: e.to_string(),
        })?;

        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.registry.clone(),
            self.events.clone(),
            Arc::clone(&self.connection_counter),
            cancel.clone(),
        ));

        info!(addr = %local_addr, "Relay server listening");
        let _ = self.events.send(ServerEvent::Listening { addr: local_addr });

        *lifecycle = Lifecycle::Listening {
            local_addr,
            cancel,
            accept_task,
        };

        Ok(local_addr)
    }

    /// Broadcasts an operator-typed line to every connected client.
    ///
    /// Succeeds with the delivered count (zero sessions is fine) while
    /// listening; fails with [`ServerError::NotRunning`] otherwise.
    pub async fn operator_broadcast(&self, text: &str) -> Result<usize, ServerError> {
        {
            let lifecycle = self.lifecycle.lock().await;
            match &*lifecycle {
                Lifecycle::Listening { cancel, .. } if !cancel.is_cancelled() => {}
                _ => return Err(ServerError::NotRunning),
            }
        }

        Ok(self.registry.broadcast_all(text).await)
    }

    /// Stops the server: the listener is closed (further connection
    /// attempts are refused) and every registered session is closed,
    /// each triggering its own removal. Idempotent; stopping an
    /// already-stopped server is a no-op.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;

        let Lifecycle::Listening {
            local_addr,
            cancel,
            accept_task,
        } = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        else {
            debug!("Stop requested while already stopped");
            return;
        };

        info!(addr = %local_addr, "Stopping relay server");

        cancel.cancel();

        // The listener drops when the accept task exits.
        if let Err(e) = accept_task.await {
            warn!(error = %e, "Accept task ended abnormally");
        }

        self.registry.close_all().await;

        let _ = self.events.send(ServerEvent::Stopped);
        info!("Relay server stopped");
    }

    /// Drives the accept loop into its fatal-error exit path: the
    /// token is cancelled and the loop terminates, but the lifecycle
    /// state is left as-is.
    #[cfg(test)]
    async fn abort_accept_loop(&self) {
        if let Lifecycle::Listening { cancel, .. } = &*self.lifecycle.lock().await {
            cancel.cancel();
        }
    }
}

impl Default for RelayServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepts connections until cancelled or a fatal accept error.
///
/// Accept errors after a stop was requested are normal termination; a
/// fatal error while still meant to be listening is reported once and
/// terminates the loop, leaving established sessions untouched.
async fn accept_loop(
    listener: TcpListener,
    registry: SessionRegistry,
    events: broadcast::Sender<ServerEvent>,
    connection_counter: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Accept loop shutting down");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let id = SessionId::new(
                            connection_counter.fetch_add(1, Ordering::Relaxed),
                        );

                        // Register before spawning: stop() awaits this
                        // task before draining the registry, so every
                        // accepted session is visible to close_all.
                        let (session, reader) = Session::from_stream(id, stream, peer);
                        if !registry.add(Arc::clone(&session)).await {
                            // Ids are counter-generated, so this cannot
                            // collide in practice.
                            warn!(session = %id, "Duplicate session id, dropping connection");
                            continue;
                        }

                        info!(session = %id, peer = %peer, "Client connected");
                        let _ = events.send(ServerEvent::ClientConnected { id, peer });

                        spawn_session(session, reader, registry.clone(), events.clone());
                    }
                    Err(e) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        error!(error = %e, "Accept failed, terminating accept loop");
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    }
}

/// Spawns the receive-loop task for an already-registered session.
fn spawn_session(
    session: Arc<Session>,
    mut reader: SessionReader,
    registry: SessionRegistry,
    events: broadcast::Sender<ServerEvent>,
) {
    tokio::spawn(async move {
        receive_loop(&session, &mut reader, &events).await;

        // Whichever path ended the loop, close once and remove once;
        // the registry publishes the disconnect notice for the winner.
        let _ = session.close().await;
        registry.remove(session.id()).await;

        info!(
            session = %session.id(),
            peer = %session.peer_addr(),
            "Client disconnected"
        );
    });
}

/// Processes inbound lines for one session until it ends.
///
/// Each line's reply is sent before the next line is read; there is no
/// pipelining within a session. All failures stay inside this task.
async fn receive_loop(
    session: &Arc<Session>,
    reader: &mut SessionReader,
    events: &broadcast::Sender<ServerEvent>,
) {
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                debug!(session = %session.id(), line = %line, "Received line");
                let _ = events.send(ServerEvent::LineReceived {
                    id: session.id(),
                    peer: session.peer_addr(),
                    line: line.clone(),
                });

                let reply = reply::reply(&line);
                if let Err(e) = session.send(&reply).await {
                    warn!(session = %session.id(), error = %e, "Reply delivery failed");
                    break;
                }
            }
            Ok(None) => {
                debug!(session = %session.id(), "Peer closed connection");
                break;
            }
            Err(e) => {
                warn!(session = %session.id(), error = %e, "Read failed");
                break;
            }
        }
    }
}
