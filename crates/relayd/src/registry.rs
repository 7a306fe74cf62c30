//! Thread-safe registry of live sessions.
//!
//! The registry is the single piece of state shared across tasks: the
//! accept loop adds, each session's own task removes on close, and the
//! operator-broadcast path iterates. A session appears in the set iff it
//! is open or in the process of closing; removal publishes the
//! disconnect notice, so it happens exactly once per session no matter
//! which path (read failure, write failure, stop) initiated the close.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::event::ServerEvent;
use crate::session::{Session, SessionId};

/// Cheap-to-clone handle to the shared session set.
#[derive(Clone)]
pub struct SessionRegistry {
    /// Live sessions keyed by connection identity.
    sessions: Arc<RwLock<HashMap<SessionId, Arc<Session>>>>,

    /// Disconnect notices are published here on removal.
    events: broadcast::Sender<ServerEvent>,
}

impl SessionRegistry {
    pub fn new(events: broadcast::Sender<ServerEvent>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Inserts a session; no-op returning `false` if the id is present.
    pub async fn add(&self, session: Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.entry(session.id()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(session);
                true
            }
        }
    }

    /// Removes a session; no-op returning `None` if absent.
    ///
    /// The caller that actually removes the entry is the one whose
    /// disconnect notice is published.
    pub async fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.write().await.remove(&id);

        if let Some(ref session) = removed {
            debug!(session = %id, "Removed session from registry");
            let _ = self.events.send(ServerEvent::ClientDisconnected {
                id,
                peer: session.peer_addr(),
            });
        }

        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Weakly-consistent snapshot of the live sessions, for diagnostics
    /// and tests.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Sends `text` to every currently-registered session.
    ///
    /// Delivery is best effort: a failure to send to one session is
    /// logged, that session is closed and removed, and delivery to the
    /// rest continues. Returns the number of sessions that received the
    /// message. Sessions added or removed mid-broadcast may or may not
    /// see it; no live session receives it twice.
    pub async fn broadcast_all(&self, text: &str) -> usize {
        let targets = self.snapshot().await;

        let mut delivered = 0;
        let mut failed = Vec::new();

        for session in targets {
            match session.send(text).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        session = %session.id(),
                        error = %e,
                        "Broadcast delivery failed, dropping session"
                    );
                    failed.push(session);
                }
            }
        }

        for session in failed {
            let _ = session.close().await;
            self.remove(session.id()).await;
        }

        delivered
    }

    /// Closes and removes every registered session (server shutdown).
    pub async fn close_all(&self) {
        let drained: Vec<(SessionId, Arc<Session>)> =
            self.sessions.write().await.drain().collect();

        for (id, session) in drained {
            let peer = session.peer_addr();
            let _ = session.close().await;
            let _ = self.events.send(ServerEvent::ClientDisconnected { id, peer });
        }
    }
}
