use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ChatKind;

/// One friend invite as shown to a client: the invite id plus the
/// counterpart user's public profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteNotice {
    /// Invite id, used by the accept/decline routes.
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub seen: bool,
}

/// Events pushed over a user's notification connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FriendInviteEvent {
    /// Full snapshot of pending invites, sent right after connecting
    #[serde(rename = "ALL_FRIEND_INVITES")]
    AllFriendInvites { payload: Vec<InviteNotice> },

    #[serde(rename = "NEW_FRIEND_INVITE")]
    NewFriendInvite { payload: InviteNotice },

    #[serde(rename = "FRIEND_INVITE_ACCEPTED")]
    FriendInviteAccepted { payload: InviteNotice },

    #[serde(rename = "FRIEND_INVITE_DECLINED")]
    FriendInviteDeclined { payload: InviteNotice },
}

impl FriendInviteEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AllFriendInvites { .. } => "ALL_FRIEND_INVITES",
            Self::NewFriendInvite { .. } => "NEW_FRIEND_INVITE",
            Self::FriendInviteAccepted { .. } => "FRIEND_INVITE_ACCEPTED",
            Self::FriendInviteDeclined { .. } => "FRIEND_INVITE_DECLINED",
        }
    }
}

/// A persisted chat message on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub text: Option<String>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMember {
    pub id: Uuid,
    pub username: String,
}

/// Events pushed over a chat connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    /// History replay (newest first), sent right after joining
    #[serde(rename = "ALL_MESSAGES", rename_all = "camelCase")]
    AllMessages {
        messages: Vec<MessagePayload>,
        chat_name: Option<String>,
        chat_type: ChatKind,
        members: Vec<ChatMember>,
    },

    #[serde(rename = "NEW_MESSAGE")]
    NewMessage { message: MessagePayload },
}

impl ChatEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AllMessages { .. } => "ALL_MESSAGES",
            Self::NewMessage { .. } => "NEW_MESSAGE",
        }
    }
}

/// Serialize an event into the JSON text frame sent to clients.
pub fn to_frame<T: Serialize>(event: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
