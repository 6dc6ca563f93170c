//! # hearth-store
//!
//! Relational storage for the Hearth chat server, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for the three stores
//! the server consumes: credentials (users), friendships, and
//! chats/messages. Compound operations that must succeed or fail together
//! run inside a single transaction.

pub mod chats;
pub mod database;
pub mod friendships;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
