use serde::{Deserialize, Serialize};

use cogito_core::types::UserRole;

/// Account allowed to sign in to the chat UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// UUIDv7.
    pub id: String,
    pub username: String,
    pub role: UserRole,
    /// argon2id PHC string. Never leaves the server.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    /// RFC3339.
    pub created_at: String,
    pub updated_at: String,
}
