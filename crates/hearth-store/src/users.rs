//! Credential store: CRUD for [`User`] records.

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::{decode_ts, decode_uuid, encode_ts, now_ts, Database};
use crate::error::Result;
use crate::models::User;

const USER_COLUMNS: &str = "id, username, email, password_hash, created_at";

impl Database {
    /// Insert a new user. Returns [`StoreError::Conflict`] when the username
    /// or email is already taken.
    ///
    /// [`StoreError::Conflict`]: crate::StoreError::Conflict
    pub fn create_user(&self, username: &str, email: &str, password_hash: &str) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now_ts(),
        };

        self.conn().execute(
            "INSERT INTO users (id, username, email, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id.to_string(),
                user.username,
                user.email,
                user.password_hash,
                encode_ts(&user.created_at),
            ],
        )?;

        tracing::debug!(user = %user.id, "user created");
        Ok(user)
    }

    /// Email lookup is case-insensitive.
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(4)?;

    Ok(User {
        id: decode_uuid(0, &id)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: decode_ts(4, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::database::test_support::open_temp;
    use crate::StoreError;

    #[test]
    fn create_and_lookup() {
        let (_dir, db) = open_temp();
        let user = db.create_user("alice", "alice@example.com", "$hash").unwrap();

        assert_eq!(db.find_user_by_email("ALICE@example.com").unwrap(), Some(user.clone()));
        assert_eq!(
            db.find_user_by_username("alice").unwrap().map(|u| u.id),
            Some(user.id)
        );
        assert!(db.find_user_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_is_conflict() {
        let (_dir, db) = open_temp();
        db.create_user("alice", "alice@example.com", "$hash").unwrap();

        let err = db
            .create_user("alice2", "alice@example.com", "$hash")
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn unknown_email_is_none() {
        let (_dir, db) = open_temp();
        assert!(db.find_user_by_email("nobody@example.com").unwrap().is_none());
    }
}
