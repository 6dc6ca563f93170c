//! Friendship store: invites, their status transitions, and friend lists.

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use hearth_shared::identity::Identity;
use hearth_shared::types::FriendshipStatus;

use crate::database::{decode_ts, decode_uuid, encode_ts, now_ts, Database};
use crate::error::Result;
use crate::models::{Friendship, PendingInvite, RemovedFriendship};

const FRIENDSHIP_COLUMNS: &str = "id, inviter_id, invitee_id, status, seen, requested_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new pending invite.
    pub fn insert_friendship(&self, inviter_id: Uuid, invitee_id: Uuid) -> Result<Friendship> {
        insert_pending(self.conn(), inviter_id, invitee_id)
    }

    /// Delete `old_id` and insert a fresh pending invite in one transaction.
    pub fn replace_friendship(
        &mut self,
        old_id: Uuid,
        inviter_id: Uuid,
        invitee_id: Uuid,
    ) -> Result<Friendship> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "DELETE FROM friendships WHERE id = ?1",
            params![old_id.to_string()],
        )?;
        let invite = insert_pending(&tx, inviter_id, invitee_id)?;
        tx.commit()?;

        tracing::debug!(old = %old_id, new = %invite.id, "friendship superseded");
        Ok(invite)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_friendship(&self, id: Uuid) -> Result<Friendship> {
        let friendship = self.conn().query_row(
            &format!("SELECT {FRIENDSHIP_COLUMNS} FROM friendships WHERE id = ?1"),
            params![id.to_string()],
            row_to_friendship,
        )?;
        Ok(friendship)
    }

    /// The friendship row between two users, in either direction.
    pub fn find_friendship_between(&self, a: Uuid, b: Uuid) -> Result<Option<Friendship>> {
        let friendship = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {FRIENDSHIP_COLUMNS} FROM friendships
                     WHERE (inviter_id = ?1 AND invitee_id = ?2)
                        OR (inviter_id = ?2 AND invitee_id = ?1)"
                ),
                params![a.to_string(), b.to_string()],
                row_to_friendship,
            )
            .optional()?;
        Ok(friendship)
    }

    /// Pending invites addressed to `invitee_id`, oldest first.
    pub fn pending_invites_for(&self, invitee_id: Uuid) -> Result<Vec<PendingInvite>> {
        let mut stmt = self.conn().prepare(
            "SELECT f.id, f.inviter_id, f.invitee_id, f.status, f.seen, f.requested_at,
                    u.username, u.email
             FROM friendships f
             JOIN users u ON u.id = f.inviter_id
             WHERE f.invitee_id = ?1 AND f.status = 'pending'
             ORDER BY f.requested_at ASC",
        )?;

        let rows = stmt.query_map(params![invitee_id.to_string()], |row| {
            let invite = row_to_friendship(row)?;
            let inviter = Identity::new(invite.inviter_id, row.get::<_, String>(6)?, row.get::<_, String>(7)?);
            Ok(PendingInvite { invite, inviter })
        })?;

        let mut invites = Vec::new();
        for row in rows {
            invites.push(row?);
        }
        Ok(invites)
    }

    /// Everyone with an accepted friendship to `user_id`, ordered by username.
    pub fn list_friends(&self, user_id: Uuid) -> Result<Vec<Identity>> {
        let mut stmt = self.conn().prepare(
            "SELECT u.id, u.username, u.email
             FROM friendships f
             JOIN users u
               ON u.id = CASE WHEN f.inviter_id = ?1 THEN f.invitee_id ELSE f.inviter_id END
             WHERE (f.inviter_id = ?1 OR f.invitee_id = ?1) AND f.status = 'accepted'
             ORDER BY u.username ASC",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], |row| {
            let id: String = row.get(0)?;
            Ok(Identity::new(decode_uuid(0, &id)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut friends = Vec::new();
        for row in rows {
            friends.push(row?);
        }
        Ok(friends)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Move a pending invite addressed to `invitee_id` into `status`.
    ///
    /// Returns `false` when no such pending invite exists, so a terminal
    /// state can only ever be reached once.
    pub fn resolve_invite(
        &self,
        id: Uuid,
        invitee_id: Uuid,
        status: FriendshipStatus,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE friendships SET status = ?3
             WHERE id = ?1 AND invitee_id = ?2 AND status = 'pending'",
            params![id.to_string(), invitee_id.to_string(), status.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Flag every pending invite addressed to `invitee_id` as seen.
    pub fn mark_invites_seen(&self, invitee_id: Uuid) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE friendships SET seen = 1
             WHERE invitee_id = ?1 AND status = 'pending' AND seen = 0",
            params![invitee_id.to_string()],
        )?;
        Ok(affected)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Remove the accepted friendship between two users together with their
    /// private chat, atomically. Returns `None` when they are not friends.
    pub fn remove_friendship(
        &mut self,
        user_id: Uuid,
        friend_id: Uuid,
    ) -> Result<Option<RemovedFriendship>> {
        let tx = self.conn_mut().transaction()?;

        let friendship_id: Option<String> = tx
            .query_row(
                "SELECT id FROM friendships
                 WHERE ((inviter_id = ?1 AND invitee_id = ?2)
                     OR (inviter_id = ?2 AND invitee_id = ?1))
                   AND status = 'accepted'",
                params![user_id.to_string(), friend_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(friendship_id) = friendship_id else {
            return Ok(None);
        };

        tx.execute(
            "DELETE FROM friendships WHERE id = ?1",
            params![friendship_id],
        )?;

        let private_chat_id = crate::chats::find_private_chat_in(&tx, user_id, friend_id)?;
        if let Some(chat_id) = private_chat_id {
            tx.execute("DELETE FROM chats WHERE id = ?1", params![chat_id.to_string()])?;
        }

        tx.commit()?;

        Ok(Some(RemovedFriendship {
            friendship_id: decode_uuid(0, &friendship_id)?,
            private_chat_id,
        }))
    }
}

fn insert_pending(conn: &Connection, inviter_id: Uuid, invitee_id: Uuid) -> Result<Friendship> {
    let invite = Friendship {
        id: Uuid::new_v4(),
        inviter_id,
        invitee_id,
        status: FriendshipStatus::Pending,
        seen: false,
        requested_at: now_ts(),
    };

    conn.execute(
        "INSERT INTO friendships (id, inviter_id, invitee_id, status, seen, requested_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        params![
            invite.id.to_string(),
            invite.inviter_id.to_string(),
            invite.invitee_id.to_string(),
            invite.status.as_str(),
            encode_ts(&invite.requested_at),
        ],
    )?;

    Ok(invite)
}

fn row_to_friendship(row: &rusqlite::Row<'_>) -> rusqlite::Result<Friendship> {
    let id: String = row.get(0)?;
    let inviter: String = row.get(1)?;
    let invitee: String = row.get(2)?;
    let status: String = row.get(3)?;
    let requested_at: String = row.get(5)?;

    let status = FriendshipStatus::from_str(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown friendship status '{status}'").into(),
        )
    })?;

    Ok(Friendship {
        id: decode_uuid(0, &id)?,
        inviter_id: decode_uuid(1, &inviter)?,
        invitee_id: decode_uuid(2, &invitee)?,
        status,
        seen: row.get(4)?,
        requested_at: decode_ts(5, &requested_at)?,
    })
}
