//! Chat fan-out registry.
//!
//! Each chat has a room of live connections keyed by [`PeerKey`]. The same
//! key reconnecting to the same chat replaces its old connection rather than
//! adding a second one.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use hearth_shared::protocol::ChatEvent;

use crate::connection::{ConnectionHandle, Delivery};

/// Identifies one client tab inside a chat: the user plus a session string
/// (the `?session=` query value, or the peer address when absent).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerKey {
    pub user_id: Uuid,
    pub session: String,
}

impl PeerKey {
    pub fn new(user_id: Uuid, session: impl Into<String>) -> Self {
        Self {
            user_id,
            session: session.into(),
        }
    }
}

/// Delivery tally for one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

struct ChatPeer {
    key: PeerKey,
    handle: ConnectionHandle,
}

struct ChatRoom {
    chat_id: Uuid,
    peers: Vec<ChatPeer>,
}

impl ChatRoom {
    fn new(chat_id: Uuid) -> Self {
        Self {
            chat_id,
            peers: Vec::new(),
        }
    }

    fn join(&mut self, key: PeerKey, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let replaced = self
            .peers
            .iter()
            .position(|p| p.key == key)
            .map(|idx| self.peers.swap_remove(idx).handle);

        if let Some(old) = &replaced {
            old.close();
        }

        info!(
            chat = %self.chat_id,
            user = %key.user_id,
            conn = %handle.id(),
            replaced = replaced.is_some(),
            peers = self.peers.len() + 1,
            "Peer joined chat"
        );

        self.peers.push(ChatPeer { key, handle });
        replaced
    }

    fn leave(&mut self, key: &PeerKey, conn_id: Uuid) -> bool {
        let before = self.peers.len();
        self.peers
            .retain(|p| !(p.key == *key && p.handle.id() == conn_id));
        let removed = self.peers.len() != before;

        if removed {
            info!(
                chat = %self.chat_id,
                user = %key.user_id,
                conn = %conn_id,
                peers = self.peers.len(),
                "Peer left chat"
            );
        }
        removed
    }

    fn broadcast(&self, event: &ChatEvent) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for peer in &self.peers {
            match peer.handle.try_send_json(event) {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Dropped => {
                    debug!(chat = %self.chat_id, conn = %peer.handle.id(), "Dropping message for peer");
                    report.dropped += 1;
                }
            }
        }
        report
    }

    fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[derive(Clone, Default)]
pub struct ChatHub {
    rooms: Arc<RwLock<HashMap<Uuid, ChatRoom>>>,
}

impl ChatHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a chat (creating its room if missing). Returns the connection this
    /// one replaced, already closed.
    pub async fn join(
        &self,
        chat_id: Uuid,
        key: PeerKey,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(chat_id)
            .or_insert_with(|| ChatRoom::new(chat_id))
            .join(key, handle)
    }

    /// Leave a chat if `conn_id` is still the connection registered under
    /// `key`. Auto-deletes the room if it becomes empty.
    pub async fn leave(&self, chat_id: Uuid, key: &PeerKey, conn_id: Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(&chat_id) else {
            return false;
        };

        let removed = room.leave(key, conn_id);
        if room.is_empty() {
            rooms.remove(&chat_id);
            debug!(chat = %chat_id, "Removed empty chat room");
        }
        removed
    }

    pub async fn broadcast(&self, chat_id: Uuid, event: &ChatEvent) -> BroadcastReport {
        let rooms = self.rooms.read().await;
        match rooms.get(&chat_id) {
            Some(room) => room.broadcast(event),
            None => BroadcastReport::default(),
        }
    }

    /// Close and forget every connection of a chat (used when the chat is
    /// deleted). Returns how many were closed.
    pub async fn close_chat(&self, chat_id: Uuid) -> usize {
        let Some(room) = self.rooms.write().await.remove(&chat_id) else {
            return 0;
        };
        for peer in &room.peers {
            peer.handle.close();
        }
        info!(chat = %chat_id, closed = room.peers.len(), "Closed chat room");
        room.peers.len()
    }

    pub async fn connection_count(&self, chat_id: Uuid) -> usize {
        self.rooms
            .read()
            .await
            .get(&chat_id)
            .map(|r| r.peers.len())
            .unwrap_or(0)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hearth_shared::protocol::MessagePayload;

    fn message(text: &str) -> ChatEvent {
        ChatEvent::NewMessage {
            message: MessagePayload {
                id: Uuid::new_v4(),
                sender_id: Uuid::new_v4(),
                text: Some(text.into()),
                image: None,
                created_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn test_broadcast_stays_in_chat() {
        let hub = ChatHub::new();
        let (chat_a, chat_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let (h1, mut o1) = ConnectionHandle::new(8);
        let (h2, mut o2) = ConnectionHandle::new(8);
        let (h3, mut o3) = ConnectionHandle::new(8);
        hub.join(chat_a, PeerKey::new(alice, "tab-1"), h1).await;
        hub.join(chat_a, PeerKey::new(bob, "tab-1"), h2).await;
        hub.join(chat_b, PeerKey::new(carol, "tab-1"), h3.clone()).await;

        let report = hub.broadcast(chat_a, &message("hello")).await;
        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 0 });

        assert!(o1.recv().await.unwrap().contains("hello"));
        assert!(o2.recv().await.unwrap().contains("hello"));

        h3.close();
        assert_eq!(o3.recv().await, None);
    }

    #[tokio::test]
    async fn test_same_key_replaces() {
        let hub = ChatHub::new();
        let chat = Uuid::new_v4();
        let key = PeerKey::new(Uuid::new_v4(), "10.0.0.1:5000");

        let (old, mut old_outbox) = ConnectionHandle::new(8);
        let (new, _new_outbox) = ConnectionHandle::new(8);
        assert!(hub.join(chat, key.clone(), old.clone()).await.is_none());
        let replaced = hub.join(chat, key.clone(), new.clone()).await.unwrap();

        assert_eq!(replaced.id(), old.id());
        assert!(old.is_closed());
        assert_eq!(old_outbox.recv().await, None);
        assert_eq!(hub.connection_count(chat).await, 1);

        // The replaced connection's close handler must not remove the new one.
        assert!(!hub.leave(chat, &key, old.id()).await);
        assert_eq!(hub.connection_count(chat).await, 1);
    }

    #[tokio::test]
    async fn test_distinct_users_same_address_coexist() {
        let hub = ChatHub::new();
        let chat = Uuid::new_v4();
        let (h1, _o1) = ConnectionHandle::new(8);
        let (h2, _o2) = ConnectionHandle::new(8);

        hub.join(chat, PeerKey::new(Uuid::new_v4(), "203.0.113.7:443"), h1).await;
        hub.join(chat, PeerKey::new(Uuid::new_v4(), "203.0.113.7:443"), h2).await;

        assert_eq!(hub.connection_count(chat).await, 2);
    }

    #[tokio::test]
    async fn test_leave_removes_empty_room() {
        let hub = ChatHub::new();
        let chat = Uuid::new_v4();
        let key = PeerKey::new(Uuid::new_v4(), "tab");
        let (h, _o) = ConnectionHandle::new(8);

        hub.join(chat, key.clone(), h.clone()).await;
        assert!(hub.leave(chat, &key, h.id()).await);
        assert_eq!(hub.room_count().await, 0);
        assert_eq!(
            hub.broadcast(chat, &message("nobody")).await,
            BroadcastReport::default()
        );
    }

    #[tokio::test]
    async fn test_close_chat_closes_everyone() {
        let hub = ChatHub::new();
        let chat = Uuid::new_v4();
        let (h1, _o1) = ConnectionHandle::new(8);
        let (h2, _o2) = ConnectionHandle::new(8);
        hub.join(chat, PeerKey::new(Uuid::new_v4(), "a"), h1.clone()).await;
        hub.join(chat, PeerKey::new(Uuid::new_v4(), "b"), h2.clone()).await;

        assert_eq!(hub.close_chat(chat).await, 2);
        assert!(h1.is_closed() && h2.is_closed());
        assert_eq!(hub.connection_count(chat).await, 0);
    }
}
