//! Connection Registry
//!
//! Tracks live client sessions, fans out events, and buffers
//! undeliverable per-player messages until the player reconnects.
//!
//! Delivery goes through each connection's bounded mpsc channel; the
//! socket write itself happens in that connection's writer task, so no
//! registry lock is ever held across network I/O. A session whose
//! channel is closed or full is treated as disconnected and removed,
//! without aborting delivery to anyone else.

use std::collections::{BTreeMap, VecDeque};

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::state::PlayerId;
use crate::network::protocol::ServerMessage;

/// Unique session identifier.
pub type SessionId = Uuid;

/// Most recent messages kept per offline player; oldest dropped first.
pub const PENDING_QUEUE_LIMIT: usize = 50;

/// A live client session.
struct SessionHandle {
    /// Player association, set by the first identifying message.
    player_id: Option<PlayerId>,
    /// Outbound channel to the session's writer task.
    sender: mpsc::Sender<ServerMessage>,
}

/// Live-session index plus per-player pending queues.
#[derive(Default)]
pub struct ConnectionRegistry {
    /// All live sessions.
    sessions: RwLock<BTreeMap<SessionId, SessionHandle>>,
    /// Player to live-session mapping.
    players: RwLock<BTreeMap<PlayerId, Vec<SessionId>>>,
    /// Buffered messages for players with no live session.
    pending: Mutex<BTreeMap<PlayerId, VecDeque<ServerMessage>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session and return its identifier.
    pub async fn register(&self, sender: mpsc::Sender<ServerMessage>) -> SessionId {
        let session_id = Uuid::new_v4();
        self.sessions.write().await.insert(
            session_id,
            SessionHandle {
                player_id: None,
                sender,
            },
        );

        debug!(%session_id, "session registered");
        session_id
    }

    /// Associate a session with a player and drain that player's
    /// pending queue into it, in enqueue order.
    ///
    /// Returns false if the session is gone. Re-identifying with the
    /// same player is a no-op apart from a (by then empty) flush.
    pub async fn identify(&self, session_id: SessionId, player_id: &PlayerId) -> bool {
        {
            let mut sessions = self.sessions.write().await;
            let handle = match sessions.get_mut(&session_id) {
                Some(h) => h,
                None => return false,
            };
            if handle.player_id.is_none() {
                handle.player_id = Some(player_id.clone());
            }
        }

        {
            let mut players = self.players.write().await;
            let sessions_for_player = players.entry(player_id.clone()).or_default();
            if !sessions_for_player.contains(&session_id) {
                sessions_for_player.push(session_id);
            }
        }

        self.flush_pending(player_id, session_id).await;
        true
    }

    /// Remove a session. A player left with zero live sessions drops
    /// out of the live index; their pending queue persists.
    pub async fn unregister(&self, session_id: SessionId) {
        let player_id = {
            let mut sessions = self.sessions.write().await;
            match sessions.remove(&session_id) {
                Some(handle) => handle.player_id,
                None => return,
            }
        };

        if let Some(player_id) = player_id {
            let mut players = self.players.write().await;
            if let Some(ids) = players.get_mut(&player_id) {
                ids.retain(|id| *id != session_id);
                if ids.is_empty() {
                    players.remove(&player_id);
                    info!(%player_id, "player offline");
                }
            }
        }

        debug!(%session_id, "session unregistered");
    }

    /// Send an event to every live session.
    ///
    /// The recipient list is snapshotted before sending; sessions that
    /// fail to receive are removed after iteration completes, never
    /// aborting delivery to the rest.
    pub async fn broadcast(&self, message: ServerMessage) {
        self.broadcast_filtered(None, message).await;
    }

    /// Send an event to every live session except `origin`.
    pub async fn broadcast_except(&self, origin: SessionId, message: ServerMessage) {
        self.broadcast_filtered(Some(origin), message).await;
    }

    async fn broadcast_filtered(&self, skip: Option<SessionId>, message: ServerMessage) {
        let recipients: Vec<(SessionId, mpsc::Sender<ServerMessage>)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(id, _)| Some(**id) != skip)
                .map(|(id, handle)| (*id, handle.sender.clone()))
                .collect()
        };

        let mut failed = Vec::new();
        for (session_id, sender) in recipients {
            if sender.try_send(message.clone()).is_err() {
                warn!(%session_id, "broadcast delivery failed, dropping session");
                failed.push(session_id);
            }
        }

        for session_id in failed {
            self.unregister(session_id).await;
        }
    }

    /// Deliver an event to a player's live sessions, or queue it
    /// (bounded, oldest dropped first) if the player is offline.
    pub async fn send_to(&self, player_id: &PlayerId, message: ServerMessage) {
        let session_ids: Vec<SessionId> = {
            let players = self.players.read().await;
            players.get(player_id).cloned().unwrap_or_default()
        };

        if session_ids.is_empty() {
            self.enqueue_pending(player_id, message).await;
            return;
        }

        let senders: Vec<(SessionId, mpsc::Sender<ServerMessage>)> = {
            let sessions = self.sessions.read().await;
            session_ids
                .iter()
                .filter_map(|id| sessions.get(id).map(|h| (*id, h.sender.clone())))
                .collect()
        };

        let mut delivered = false;
        let mut failed = Vec::new();
        for (session_id, sender) in senders {
            if sender.try_send(message.clone()).is_ok() {
                delivered = true;
            } else {
                warn!(%session_id, %player_id, "direct delivery failed, dropping session");
                failed.push(session_id);
            }
        }

        for session_id in failed {
            self.unregister(session_id).await;
        }

        // Every session died under us: the player is offline after all.
        if !delivered {
            self.enqueue_pending(player_id, message).await;
        }
    }

    /// Deliver and clear a player's queued messages, in enqueue order.
    pub async fn flush_pending(&self, player_id: &PlayerId, session_id: SessionId) {
        let queued = {
            let mut pending = self.pending.lock().await;
            match pending.remove(player_id) {
                Some(q) if !q.is_empty() => q,
                _ => return,
            }
        };

        let sender = {
            let sessions = self.sessions.read().await;
            match sessions.get(&session_id) {
                Some(handle) => handle.sender.clone(),
                None => return,
            }
        };

        let count = queued.len();
        for message in queued {
            if sender.try_send(message).is_err() {
                warn!(%session_id, %player_id, "session died during pending flush");
                self.unregister(session_id).await;
                return;
            }
        }

        info!(%player_id, count, "pending messages flushed");
    }

    /// True if the player has at least one live session.
    pub async fn has_live_session(&self, player_id: &PlayerId) -> bool {
        self.players.read().await.contains_key(player_id)
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Number of distinct players with a live session.
    pub async fn online_player_count(&self) -> usize {
        self.players.read().await.len()
    }

    async fn enqueue_pending(&self, player_id: &PlayerId, message: ServerMessage) {
        let mut pending = self.pending.lock().await;
        let queue = pending.entry(player_id.clone()).or_default();
        if queue.len() >= PENDING_QUEUE_LIMIT {
            queue.pop_front();
        }
        queue.push_back(message);
    }
}
