//! v001 -- Initial schema creation.
//!
//! Creates `users`, `friendships`, `chats`, `chat_members` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (credential store)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,            -- UUID v4
    username      TEXT NOT NULL UNIQUE,
    email         TEXT NOT NULL UNIQUE COLLATE NOCASE,
    password_hash TEXT NOT NULL,                        -- Argon2id PHC string
    created_at    TEXT NOT NULL                         -- RFC-3339
);

-- ----------------------------------------------------------------
-- Friendships (invites). One row per unordered pair at any time;
-- a declined invite is superseded by delete + insert.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS friendships (
    id           TEXT PRIMARY KEY NOT NULL,             -- UUID v4
    inviter_id   TEXT NOT NULL,
    invitee_id   TEXT NOT NULL,
    status       TEXT NOT NULL CHECK (status IN ('pending', 'accepted', 'declined')),
    seen         INTEGER NOT NULL DEFAULT 0,            -- boolean 0/1
    requested_at TEXT NOT NULL,

    CHECK (inviter_id <> invitee_id),
    FOREIGN KEY (inviter_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (invitee_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_friendships_pair
    ON friendships(min(inviter_id, invitee_id), max(inviter_id, invitee_id));

CREATE INDEX IF NOT EXISTS idx_friendships_invitee_status
    ON friendships(invitee_id, status);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id         TEXT PRIMARY KEY NOT NULL,               -- UUID v4
    kind       TEXT NOT NULL CHECK (kind IN ('private', 'group')),
    name       TEXT,                                    -- NULL for private chats
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_members (
    chat_id TEXT NOT NULL,
    user_id TEXT NOT NULL,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_members_user ON chat_members(user_id);

-- ----------------------------------------------------------------
-- Messages (append-only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,               -- UUID v4
    chat_id    TEXT NOT NULL,
    sender_id  TEXT NOT NULL,
    text       TEXT,
    image      TEXT,
    created_at TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_created
    ON messages(chat_id, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
