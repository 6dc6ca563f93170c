//! Friend-request notification registry.
//!
//! Holds at most one live notification connection per user. Pushes are
//! best-effort: a user without a live connection simply misses the event and
//! catches up from the snapshot sent on their next connect.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use hearth_shared::protocol::FriendInviteEvent;

use crate::connection::{ConnectionHandle, Delivery};

#[derive(Clone, Default)]
pub struct NotificationRegistry {
    connections: Arc<RwLock<HashMap<Uuid, ConnectionHandle>>>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handle` the user's notification connection. Any previous
    /// connection is closed and returned.
    pub async fn register(&self, user_id: Uuid, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let conn_id = handle.id();
        let previous = self.connections.write().await.insert(user_id, handle);

        if let Some(prev) = &previous {
            prev.close();
            info!(user = %user_id, evicted = %prev.id(), conn = %conn_id, "Replaced notification connection");
        } else {
            debug!(user = %user_id, conn = %conn_id, "Registered notification connection");
        }

        previous
    }

    /// Remove the user's entry, but only if it is still `conn_id`. An evicted
    /// connection closing late must not unregister its successor.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(&user_id) {
            Some(current) if current.id() == conn_id => {
                connections.remove(&user_id);
                debug!(user = %user_id, conn = %conn_id, "Unregistered notification connection");
                true
            }
            _ => false,
        }
    }

    pub async fn push(&self, user_id: Uuid, event: &FriendInviteEvent) -> Delivery {
        let connections = self.connections.read().await;
        let Some(handle) = connections.get(&user_id) else {
            debug!(user = %user_id, event = event.event_type(), "No live connection, event dropped");
            return Delivery::Dropped;
        };

        let outcome = handle.try_send_json(event);
        debug!(user = %user_id, event = event.event_type(), ?outcome, "Pushed notification");
        outcome
    }

    pub async fn is_connected(&self, user_id: Uuid) -> bool {
        self.connections
            .read()
            .await
            .get(&user_id)
            .map(|h| !h.is_closed())
            .unwrap_or(false)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }
}
