//! Chat creation, listing, history and message posting.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use hearth_shared::constants::MAX_MESSAGE_TEXT_SIZE;
use hearth_shared::identity::Identity;
use hearth_shared::protocol::{ChatEvent, ChatMember, MessagePayload};
use hearth_shared::types::ChatKind;
use hearth_store::{Chat, ChatMessage, Database, StoreError};

use crate::connection::{ConnectionHandle, Delivery};
use crate::error::ServerError;
use crate::hub::{BroadcastReport, ChatHub, PeerKey};

/// A chat as listed to the client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: Uuid,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    pub users_count: usize,
    pub users: Vec<ChatMember>,
}

impl From<Chat> for ChatSummary {
    fn from(chat: Chat) -> Self {
        let users = members(&chat);
        Self {
            id: chat.id,
            name: chat.name,
            kind: chat.kind,
            users_count: users.len(),
            users,
        }
    }
}

#[derive(Clone)]
pub struct ChatService {
    db: Arc<Mutex<Database>>,
    hub: ChatHub,
}

impl ChatService {
    pub fn new(db: Arc<Mutex<Database>>, hub: ChatHub) -> Self {
        Self { db, hub }
    }

    /// Open a chat between `requester` and the given friends.
    ///
    /// One friend reuses the pair's private chat when it exists; two or more
    /// always create a new group named after its members.
    pub async fn create_chat(&self, requester: &Identity, user_ids: &[Uuid]) -> Result<Chat, ServerError> {
        let mut targets: Vec<Uuid> = Vec::with_capacity(user_ids.len());
        for id in user_ids {
            if !targets.contains(id) {
                targets.push(*id);
            }
        }

        if targets.is_empty() {
            return Err(ServerError::Validation("userIds must name at least one friend".into()));
        }
        if targets.contains(&requester.id) {
            return Err(ServerError::Validation("userIds must not include yourself".into()));
        }

        let mut db = self.db.lock().await;

        let friends = db.list_friends(requester.id)?;
        let missing: Vec<String> = targets
            .iter()
            .filter(|id| !friends.iter().any(|f| f.id == **id))
            .map(Uuid::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(ServerError::NotFound(format!(
                "User ids not found as friends of user {}: {}",
                requester.username,
                missing.join(", ")
            )));
        }

        if let [friend_id] = targets.as_slice() {
            if let Some(existing) = db.find_private_chat(requester.id, *friend_id)? {
                debug!(chat = %existing, "Reusing private chat");
                return Ok(db.get_chat(existing)?);
            }
            let chat = db.create_chat(ChatKind::Private, None, &[requester.id, *friend_id])?;
            info!(chat = %chat.id, user = %requester.id, "Private chat created");
            return Ok(chat);
        }

        let name = std::iter::once(requester.username.as_str())
            .chain(targets.iter().filter_map(|id| {
                friends.iter().find(|f| f.id == *id).map(|f| f.username.as_str())
            }))
            .collect::<Vec<_>>()
            .join(",");

        let mut member_ids = targets.clone();
        member_ids.push(requester.id);

        let chat = db.create_chat(ChatKind::Group, Some(&name), &member_ids)?;
        info!(chat = %chat.id, user = %requester.id, members = member_ids.len(), "Group chat created");
        Ok(chat)
    }

    pub async fn list_chats(&self, user: &Identity) -> Result<Vec<ChatSummary>, ServerError> {
        let chats = self.db.lock().await.list_chats_for_member(user.id)?;
        Ok(chats.into_iter().map(ChatSummary::from).collect())
    }

    /// Load a chat for `user_id`, failing before anything is sent when the
    /// chat is missing or the user is not a member.
    pub async fn authorize(&self, chat_id: Uuid, user_id: Uuid) -> Result<Chat, ServerError> {
        member_chat(&*self.db.lock().await, chat_id, user_id)
    }

    /// Join `handle` to the chat and queue the history replay, newest message
    /// first.
    ///
    /// Runs under the store lock so no broadcast can slip in between the
    /// replay and the join. Existence and membership are checked again here
    /// since the chat may have been deleted after the socket was authorized.
    pub async fn join(
        &self,
        chat_id: Uuid,
        key: PeerKey,
        handle: &ConnectionHandle,
    ) -> Result<Delivery, ServerError> {
        let db = self.db.lock().await;
        let chat = member_chat(&db, chat_id, key.user_id)?;
        let messages = db.list_messages(chat.id)?;
        let replay = ChatEvent::AllMessages {
            messages: messages.into_iter().map(payload).collect(),
            chat_name: chat.name.clone(),
            chat_type: chat.kind,
            members: members(&chat),
        };

        self.hub.join(chat.id, key, handle.clone()).await;
        let delivery = handle.try_send_json(&replay);
        drop(db);

        Ok(delivery)
    }

    /// Persist a message and broadcast it to everyone joined to the chat.
    ///
    /// The store lock is held across the broadcast so every connection
    /// receives messages of one chat in commit order.
    pub async fn post_message(
        &self,
        chat_id: Uuid,
        sender: &Identity,
        text: &str,
    ) -> Result<(ChatMessage, BroadcastReport), ServerError> {
        if text.trim().is_empty() {
            return Err(ServerError::Validation("Message text is empty".into()));
        }
        if text.len() > MAX_MESSAGE_TEXT_SIZE {
            return Err(ServerError::Validation(format!(
                "Message text exceeds {MAX_MESSAGE_TEXT_SIZE} bytes"
            )));
        }

        let db = self.db.lock().await;
        if !db.is_chat_member(chat_id, sender.id)? {
            return Err(ServerError::Forbidden("You are not a member of this chat".into()));
        }
        let message = db.insert_message(chat_id, sender.id, Some(text), None)?;
        let event = ChatEvent::NewMessage {
            message: payload(message.clone()),
        };
        let report = self.hub.broadcast(chat_id, &event).await;
        drop(db);

        debug!(
            chat = %chat_id,
            message = %message.id,
            delivered = report.delivered,
            dropped = report.dropped,
            "Message broadcast"
        );
        Ok((message, report))
    }
}

fn member_chat(db: &Database, chat_id: Uuid, user_id: Uuid) -> Result<Chat, ServerError> {
    let chat = match db.get_chat(chat_id) {
        Ok(chat) => chat,
        Err(StoreError::NotFound) => {
            return Err(ServerError::NotFound(format!("Chat {chat_id} not found")))
        }
        Err(e) => return Err(e.into()),
    };

    if !chat.has_member(user_id) {
        return Err(ServerError::Forbidden("You are not a member of this chat".into()));
    }
    Ok(chat)
}

fn payload(message: ChatMessage) -> MessagePayload {
    MessagePayload {
        id: message.id,
        sender_id: message.sender_id,
        text: message.text,
        image: message.image,
        created_at: message.created_at,
    }
}

fn members(chat: &Chat) -> Vec<ChatMember> {
    chat.members
        .iter()
        .map(|m| ChatMember {
            id: m.id,
            username: m.username.clone(),
        })
        .collect()
}
