use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered user account as seen by every layer above the credential
/// store. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

impl Identity {
    pub fn new(id: Uuid, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            email: email.into(),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.username, self.id)
    }
}
