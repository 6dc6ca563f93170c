//! Message store. Messages are append-only.

use rusqlite::params;
use uuid::Uuid;

use crate::database::{decode_ts, decode_uuid, encode_ts, now_ts, Database};
use crate::error::Result;
use crate::models::ChatMessage;

impl Database {
    pub fn insert_message(
        &self,
        chat_id: Uuid,
        sender_id: Uuid,
        text: Option<&str>,
        image: Option<&str>,
    ) -> Result<ChatMessage> {
        let message = ChatMessage {
            id: Uuid::new_v4(),
            chat_id,
            sender_id,
            text: text.map(str::to_string),
            image: image.map(str::to_string),
            created_at: now_ts(),
        };

        self.conn().execute(
            "INSERT INTO messages (id, chat_id, sender_id, text, image, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.to_string(),
                message.chat_id.to_string(),
                message.sender_id.to_string(),
                message.text,
                message.image,
                encode_ts(&message.created_at),
            ],
        )?;

        Ok(message)
    }

    /// All messages of a chat, newest first. Ties on the timestamp fall back
    /// to insertion order.
    pub fn list_messages(&self, chat_id: Uuid) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, chat_id, sender_id, text, image, created_at
             FROM messages
             WHERE chat_id = ?1
             ORDER BY created_at DESC, rowid DESC",
        )?;

        let rows = stmt.query_map(params![chat_id.to_string()], |row| {
            let id: String = row.get(0)?;
            let chat: String = row.get(1)?;
            let sender: String = row.get(2)?;
            let created_at: String = row.get(5)?;
            Ok(ChatMessage {
                id: decode_uuid(0, &id)?,
                chat_id: decode_uuid(1, &chat)?,
                sender_id: decode_uuid(2, &sender)?,
                text: row.get(3)?,
                image: row.get(4)?,
                created_at: decode_ts(5, &created_at)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}
