//! Domain model structs persisted in the SQLite database.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use hearth_shared::identity::Identity;
use hearth_shared::types::{ChatKind, FriendshipStatus};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account, including its credential hash.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn identity(&self) -> Identity {
        Identity::new(self.id, self.username.clone(), self.email.clone())
    }
}

// ---------------------------------------------------------------------------
// Friendship
// ---------------------------------------------------------------------------

/// A directed friend request between two users.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Friendship {
    pub id: Uuid,
    pub inviter_id: Uuid,
    pub invitee_id: Uuid,
    pub status: FriendshipStatus,
    /// Whether the invitee has seen the request in their invite list.
    pub seen: bool,
    pub requested_at: DateTime<Utc>,
}

/// A pending invite joined with its inviter's public profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInvite {
    pub invite: Friendship,
    pub inviter: Identity,
}

/// Outcome of removing a friendship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovedFriendship {
    pub friendship_id: Uuid,
    /// The private chat deleted alongside the friendship, if one existed.
    pub private_chat_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Chat {
    pub id: Uuid,
    pub kind: ChatKind,
    /// `None` for private chats.
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Ordered by username.
    pub members: Vec<Identity>,
}

impl Chat {
    pub fn has_member(&self, user_id: Uuid) -> bool {
        self.members.iter().any(|m| m.id == user_id)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message. Immutable once written.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub text: Option<String>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}
