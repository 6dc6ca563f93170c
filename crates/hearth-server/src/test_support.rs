//! Fixtures shared by the server's unit tests.

use std::sync::Arc;

use tokio::sync::Mutex;

use hearth_shared::identity::Identity;
use hearth_shared::token::{TokenPolicy, TokenService};
use hearth_shared::types::FriendshipStatus;
use hearth_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;

pub type SharedDb = Arc<Mutex<Database>>;

pub fn temp_db() -> (tempfile::TempDir, SharedDb) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_at(&dir.path().join("test.db")).unwrap();
    (dir, Arc::new(Mutex::new(db)))
}

pub async fn user(db: &SharedDb, name: &str) -> Identity {
    db.lock()
        .await
        .create_user(name, &format!("{name}@example.com"), "unused")
        .unwrap()
        .identity()
}

/// Make `a` and `b` friends directly in the store.
pub async fn befriend(db: &SharedDb, a: &Identity, b: &Identity) {
    let db = db.lock().await;
    let invite = db.insert_friendship(a.id, b.id).unwrap();
    assert!(db
        .resolve_invite(invite.id, b.id, FriendshipStatus::Accepted)
        .unwrap());
}

/// Full server state over a temp database, with the auth rate limit lifted.
pub fn test_state(policy: TokenPolicy) -> (tempfile::TempDir, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_at(&dir.path().join("api.db")).unwrap();
    let config = ServerConfig {
        auth_rate_burst: 1000.0,
        ..ServerConfig::default()
    };
    let tokens = TokenService::from_seed(&[7u8; 32], policy);
    (dir, AppState::new(db, tokens, config))
}
