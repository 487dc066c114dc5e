use rusqlite::Connection;

use crate::error::Result;

/// Initialise the threads and messages tables.
///
/// Safe to call on every startup, uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS threads (
            id            TEXT PRIMARY KEY,
            user_id       TEXT NOT NULL,
            title         TEXT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_threads_user
            ON threads(user_id, updated_at DESC);

        CREATE TABLE IF NOT EXISTS messages (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id        TEXT NOT NULL REFERENCES threads(id),
            role             TEXT NOT NULL,
            content          TEXT NOT NULL,
            thinking         TEXT,
            thinking_seconds INTEGER,
            model            TEXT,
            created_at       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_thread
            ON messages(thread_id, id);",
    )?;
    Ok(())
}
