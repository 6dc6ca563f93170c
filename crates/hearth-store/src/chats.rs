//! Chat store: chats and their membership.

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use hearth_shared::identity::Identity;
use hearth_shared::types::ChatKind;

use crate::database::{decode_ts, decode_uuid, encode_ts, now_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::Chat;

impl Database {
    /// Create a chat and its membership rows atomically.
    ///
    /// `member_ids` must already be deduplicated and include the creator.
    pub fn create_chat(
        &mut self,
        kind: ChatKind,
        name: Option<&str>,
        member_ids: &[Uuid],
    ) -> Result<Chat> {
        let id = Uuid::new_v4();
        let created_at = now_ts();

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO chats (id, kind, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id.to_string(), kind.as_str(), name, encode_ts(&created_at)],
        )?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO chat_members (chat_id, user_id) VALUES (?1, ?2)")?;
            for member in member_ids {
                stmt.execute(params![id.to_string(), member.to_string()])?;
            }
        }
        let members = load_members(&tx, id)?;
        tx.commit()?;

        tracing::debug!(chat = %id, %kind, members = members.len(), "chat created");

        Ok(Chat {
            id,
            kind,
            name: name.map(str::to_string),
            created_at,
            members,
        })
    }

    pub fn get_chat(&self, id: Uuid) -> Result<Chat> {
        let (kind, name, created_at) = self.conn().query_row(
            "SELECT kind, name, created_at FROM chats WHERE id = ?1",
            params![id.to_string()],
            |row| {
                let kind: String = row.get(0)?;
                let created_at: String = row.get(2)?;
                Ok((
                    decode_kind(0, &kind)?,
                    row.get::<_, Option<String>>(1)?,
                    decode_ts(2, &created_at)?,
                ))
            },
        )?;

        Ok(Chat {
            id,
            kind,
            name,
            created_at,
            members: load_members(self.conn(), id)?,
        })
    }

    /// The private chat whose members are exactly `a` and `b`, if any.
    pub fn find_private_chat(&self, a: Uuid, b: Uuid) -> Result<Option<Uuid>> {
        find_private_chat_in(self.conn(), a, b)
    }

    /// Every chat `user_id` belongs to, newest first.
    pub fn list_chats_for_member(&self, user_id: Uuid) -> Result<Vec<Chat>> {
        let ids: Vec<Uuid> = {
            let mut stmt = self.conn().prepare(
                "SELECT c.id FROM chats c
                 JOIN chat_members m ON m.chat_id = c.id
                 WHERE m.user_id = ?1
                 ORDER BY c.created_at DESC, c.rowid DESC",
            )?;
            let rows = stmt.query_map(params![user_id.to_string()], |row| {
                let id: String = row.get(0)?;
                decode_uuid(0, &id)
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        ids.into_iter().map(|id| self.get_chat(id)).collect()
    }

    pub fn is_chat_member(&self, chat_id: Uuid, user_id: Uuid) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id.to_string(), user_id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

/// Private-chat lookup usable inside an open transaction.
pub(crate) fn find_private_chat_in(conn: &Connection, a: Uuid, b: Uuid) -> Result<Option<Uuid>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT c.id FROM chats c
             WHERE c.kind = 'private'
               AND EXISTS (SELECT 1 FROM chat_members WHERE chat_id = c.id AND user_id = ?1)
               AND EXISTS (SELECT 1 FROM chat_members WHERE chat_id = c.id AND user_id = ?2)
             LIMIT 1",
            params![a.to_string(), b.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    match id {
        Some(raw) => Ok(Some(decode_uuid(0, &raw)?)),
        None => Ok(None),
    }
}

fn load_members(conn: &Connection, chat_id: Uuid) -> Result<Vec<Identity>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.username, u.email
         FROM chat_members m
         JOIN users u ON u.id = m.user_id
         WHERE m.chat_id = ?1
         ORDER BY u.username ASC",
    )?;
    let rows = stmt.query_map(params![chat_id.to_string()], |row| {
        let id: String = row.get(0)?;
        Ok(Identity::new(
            decode_uuid(0, &id)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(StoreError::from)
}

fn decode_kind(idx: usize, raw: &str) -> rusqlite::Result<ChatKind> {
    ChatKind::from_str(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown chat kind '{raw}'").into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::open_temp;

    fn users(db: &Database, names: &[&str]) -> Vec<Uuid> {
        names
            .iter()
            .map(|n| {
                db.create_user(n, &format!("{n}@example.com"), "$h")
                    .unwrap()
                    .id
            })
            .collect()
    }

    #[test]
    fn create_and_fetch_group() {
        let (_dir, mut db) = open_temp();
        let ids = users(&db, &["carol", "alice", "bob"]);

        let chat = db
            .create_chat(ChatKind::Group, Some("carol,alice,bob"), &ids)
            .unwrap();
        let fetched = db.get_chat(chat.id).unwrap();

        assert_eq!(fetched, chat);
        let names: Vec<_> = fetched.members.iter().map(|m| m.username.as_str()).collect();
        assert_eq!(names, ["alice", "bob", "carol"]);
        assert!(db.is_chat_member(chat.id, ids[0]).unwrap());
    }

    #[test]
    fn private_chat_lookup_ignores_groups() {
        let (_dir, mut db) = open_temp();
        let ids = users(&db, &["alice", "bob", "carol"]);

        db.create_chat(ChatKind::Group, Some("g"), &ids).unwrap();
        assert_eq!(db.find_private_chat(ids[0], ids[1]).unwrap(), None);

        let private = db
            .create_chat(ChatKind::Private, None, &ids[..2])
            .unwrap();
        assert_eq!(db.find_private_chat(ids[1], ids[0]).unwrap(), Some(private.id));
        assert_eq!(db.find_private_chat(ids[0], ids[2]).unwrap(), None);
    }

    #[test]
    fn member_listing_excludes_outsiders() {
        let (_dir, mut db) = open_temp();
        let ids = users(&db, &["alice", "bob", "carol"]);

        let chat = db.create_chat(ChatKind::Private, None, &ids[..2]).unwrap();

        let alice_chats = db.list_chats_for_member(ids[0]).unwrap();
        assert_eq!(alice_chats.len(), 1);
        assert_eq!(alice_chats[0].id, chat.id);
        assert!(db.list_chats_for_member(ids[2]).unwrap().is_empty());
        assert!(!db.is_chat_member(chat.id, ids[2]).unwrap());
    }

    #[test]
    fn missing_chat_is_not_found() {
        let (_dir, db) = open_temp();
        assert!(matches!(db.get_chat(Uuid::new_v4()), Err(StoreError::NotFound)));
    }
}
