//! Notices surfaced to the presentation layer.
//!
//! The server publishes these over a `tokio::sync::broadcast` channel;
//! any front end (CLI, test harness) subscribes and renders them. The
//! `Display` impls are the human-readable notices.

use std::fmt;
use std::net::SocketAddr;

use crate::session::SessionId;

/// One observable server-side occurrence.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The listener is bound and accepting connections.
    Listening { addr: SocketAddr },

    /// A client connected and was registered.
    ClientConnected { id: SessionId, peer: SocketAddr },

    /// A client's session was closed and removed from the registry.
    ClientDisconnected { id: SessionId, peer: SocketAddr },

    /// A line arrived from a client.
    LineReceived {
        id: SessionId,
        peer: SocketAddr,
        line: String,
    },

    /// The server shut down.
    Stopped,
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::Listening { addr } => write!(f, "Server started on {addr}"),
            ServerEvent::ClientConnected { peer, .. } => {
                write!(f, "Client connected from: {peer}")
            }
            ServerEvent::ClientDisconnected { peer, .. } => {
                write!(f, "Client disconnected: {peer}")
            }
            ServerEvent::LineReceived { line, .. } => write!(f, "Client says: {line}"),
            ServerEvent::Stopped => write!(f, "Server stopped."),
        }
    }
}
