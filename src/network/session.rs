//! Player Sessions and the Broadcast Relay
//!
//! One [`PlayerSession`] per connected client, owned by the
//! [`SessionRegistry`]. The registry is the only component that may touch a
//! session's outbound channel, and it is where the lazy-eviction rule
//! lives: a session is removed at the point a send to it fails, never via
//! background polling.

use std::collections::BTreeMap;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::network::protocol::ServerMessage;
use crate::race::state::PlayerId;

/// Outbound channel capacity per session.
pub(crate) const OUTBOUND_CAPACITY: usize = 64;

/// One connected player's server-side handle: identity, the exclusively
/// owned outbound channel to its socket writer, and a liveness flag.
#[derive(Debug)]
pub struct PlayerSession {
    /// Player identifier.
    pub player_id: PlayerId,
    /// Channel to this session's socket writer task.
    sender: mpsc::Sender<ServerMessage>,
    /// False once the player announced a graceful disconnect.
    connected: bool,
}

impl PlayerSession {
    /// Create a live session around its outbound channel.
    pub fn new(player_id: PlayerId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            player_id,
            sender,
            connected: true,
        }
    }

    /// Check if the player is still live.
    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

/// The set of currently connected player sessions.
///
/// Size 0, 1, or 2 during setup; may drop to 1 after a disconnect. All
/// mutation (admission, disconnect removal, lazy eviction) goes through
/// short, exclusive critical sections.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<PlayerId, PlayerSession>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its player identity.
    pub async fn insert(&self, session: PlayerSession) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.player_id, session);
    }

    /// Remove a session. Returns true if it was present.
    pub async fn remove(&self, player: PlayerId) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&player).is_some()
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the registry holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Mark a session as no longer live (graceful disconnect notice).
    /// Returns true if the session was found.
    pub async fn mark_disconnected(&self, player: PlayerId) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&player) {
            Some(session) => {
                session.connected = false;
                true
            }
            None => false,
        }
    }

    /// The one remaining session, if the registry holds exactly one.
    pub async fn sole_survivor(&self) -> Option<PlayerId> {
        let sessions = self.sessions.read().await;
        if sessions.len() == 1 {
            sessions.keys().next().copied()
        } else {
            None
        }
    }

    /// Drop every session. Closing the outbound channels ends the writer
    /// tasks, which releases the sockets.
    pub async fn clear(&self) {
        let mut sessions = self.sessions.write().await;
        sessions.clear();
    }

    /// Deliver a message to every live session.
    ///
    /// A session whose send fails is evicted on the spot; its identity is
    /// returned so the caller can apply the forfeit rule. A dead session
    /// never prevents delivery to the others.
    pub async fn broadcast(&self, message: &ServerMessage) -> Vec<PlayerId> {
        self.deliver(message, None).await
    }

    /// Deliver a message to every live session except one (the winner gets
    /// its own message via [`SessionRegistry::send_to`]).
    pub async fn broadcast_except(
        &self,
        skip: PlayerId,
        message: &ServerMessage,
    ) -> Vec<PlayerId> {
        self.deliver(message, Some(skip)).await
    }

    /// Deliver a message to one session. Returns false (and evicts) if the
    /// session is gone or its channel is closed.
    pub async fn send_to(&self, player: PlayerId, message: ServerMessage) -> bool {
        let delivered = {
            let sessions = self.sessions.read().await;
            match sessions.get(&player) {
                Some(session) if session.is_connected() => {
                    session.sender.send(message).await.is_ok()
                }
                _ => return false,
            }
        };

        if !delivered {
            self.evict(player).await;
        }
        delivered
    }

    async fn deliver(&self, message: &ServerMessage, skip: Option<PlayerId>) -> Vec<PlayerId> {
        let mut dead = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (id, session) in sessions.iter() {
                if Some(*id) == skip || !session.is_connected() {
                    continue;
                }
                if session.sender.send(message.clone()).await.is_err() {
                    dead.push(*id);
                }
            }
        }

        for id in &dead {
            self.evict(*id).await;
        }
        dead
    }

    async fn evict(&self, player: PlayerId) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(&player).is_some() {
            warn!("evicted player {player}: outbound channel closed");
        } else {
            debug!("player {player} already gone at eviction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: u8) -> (PlayerSession, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (PlayerSession::new(PlayerId::new(id), tx), rx)
    }

    #[tokio::test]
    async fn test_insert_remove_len() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty().await);

        let (s1, _rx1) = session(1);
        registry.insert(s1).await;
        assert_eq!(registry.len().await, 1);

        let (s2, _rx2) = session(2);
        registry.insert(s2).await;
        assert_eq!(registry.len().await, 2);

        assert!(registry.remove(PlayerId::new(1)).await);
        assert!(!registry.remove(PlayerId::new(1)).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_in_order() {
        let registry = SessionRegistry::new();
        let (s1, mut rx1) = session(1);
        let (s2, mut rx2) = session(2);
        registry.insert(s1).await;
        registry.insert(s2).await;

        let first = ServerMessage::StartGame;
        let second = ServerMessage::RoomVisited {
            player: PlayerId::new(1),
            room_id: 22,
        };

        assert!(registry.broadcast(&first).await.is_empty());
        assert!(registry.broadcast(&second).await.is_empty());

        assert_eq!(rx1.recv().await, Some(first.clone()));
        assert_eq!(rx1.recv().await, Some(second.clone()));
        assert_eq!(rx2.recv().await, Some(first));
        assert_eq!(rx2.recv().await, Some(second));
    }

    #[tokio::test]
    async fn test_dead_session_is_lazily_evicted() {
        let registry = SessionRegistry::new();
        let (s1, mut rx1) = session(1);
        let (s2, rx2) = session(2);
        registry.insert(s1).await;
        registry.insert(s2).await;

        // Player 2's writer died: its receiver is gone.
        drop(rx2);

        let evicted = registry.broadcast(&ServerMessage::StartGame).await;
        assert_eq!(evicted, vec![PlayerId::new(2)]);
        assert_eq!(registry.len().await, 1);

        // Delivery to the survivor was not disturbed.
        assert_eq!(rx1.recv().await, Some(ServerMessage::StartGame));
    }

    #[tokio::test]
    async fn test_broadcast_skips_disconnected() {
        let registry = SessionRegistry::new();
        let (s1, mut rx1) = session(1);
        let (s2, mut rx2) = session(2);
        registry.insert(s1).await;
        registry.insert(s2).await;

        registry.mark_disconnected(PlayerId::new(2)).await;
        registry.broadcast(&ServerMessage::StartGame).await;

        assert_eq!(rx1.recv().await, Some(ServerMessage::StartGame));
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_except() {
        let registry = SessionRegistry::new();
        let (s1, mut rx1) = session(1);
        let (s2, mut rx2) = session(2);
        registry.insert(s1).await;
        registry.insert(s2).await;

        let defeat = ServerMessage::Defeat {
            reason: "too slow".to_string(),
        };
        registry.broadcast_except(PlayerId::new(1), &defeat).await;

        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.recv().await, Some(defeat));
    }

    #[tokio::test]
    async fn test_send_to_targets_one_session() {
        let registry = SessionRegistry::new();
        let (s1, mut rx1) = session(1);
        let (s2, mut rx2) = session(2);
        registry.insert(s1).await;
        registry.insert(s2).await;

        let victory = ServerMessage::Victory(PlayerId::new(1));
        assert!(registry.send_to(PlayerId::new(1), victory.clone()).await);

        assert_eq!(rx1.recv().await, Some(victory));
        assert!(rx2.try_recv().is_err());

        assert!(
            !registry
                .send_to(PlayerId::new(9), ServerMessage::StartGame)
                .await
        );
    }

    #[tokio::test]
    async fn test_sole_survivor() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.sole_survivor().await, None);

        let (s1, _rx1) = session(1);
        let (s2, _rx2) = session(2);
        registry.insert(s1).await;
        registry.insert(s2).await;
        assert_eq!(registry.sole_survivor().await, None);

        registry.remove(PlayerId::new(1)).await;
        assert_eq!(registry.sole_survivor().await, Some(PlayerId::new(2)));
    }

    #[tokio::test]
    async fn test_clear_closes_channels() {
        let registry = SessionRegistry::new();
        let (s1, mut rx1) = session(1);
        registry.insert(s1).await;

        registry.clear().await;
        assert!(registry.is_empty().await);
        // Dropping the session dropped the sender.
        assert_eq!(rx1.recv().await, None);
    }
}
