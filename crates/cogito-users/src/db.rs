use rusqlite::{Connection, Result};

use cogito_core::types::UserRole;

use crate::types::User;

/// Column order shared by every SELECT in this crate.
pub(crate) const USER_COLUMNS: &str =
    "id, username, role, password_hash, created_at, updated_at";

/// Map a SELECT row (column order from USER_COLUMNS) to a User.
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    use std::str::FromStr;
    let role = UserRole::from_str(&row.get::<_, String>(2)?).unwrap_or_default();
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        role,
        password_hash: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Initialise the users table. Safe to call on every
/// startup: CREATE IF NOT EXISTS means it's idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY NOT NULL,
            username      TEXT NOT NULL UNIQUE,
            role          TEXT NOT NULL DEFAULT 'user',
            password_hash TEXT NOT NULL,  -- argon2id PHC string
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );",
    )
}
