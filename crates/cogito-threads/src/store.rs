use std::str::FromStr;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use tracing::{debug, instrument};

use cogito_core::types::ThreadId;

use crate::error::{Result, ThreadError};
use crate::types::{MessageRole, NewMessage, StoredMessage, Thread};

const THREAD_SELECT: &str = "SELECT t.id, t.user_id, t.title, t.created_at, t.updated_at,
            (SELECT COUNT(*) FROM messages m WHERE m.thread_id = t.id)
     FROM threads t";

const MESSAGE_COLUMNS: &str =
    "id, thread_id, role, content, thinking, thinking_seconds, model, created_at";

/// Thread-safe store for conversation threads and their messages.
///
/// Wraps a single SQLite connection in a `Mutex`, like the users store.
pub struct ThreadStore {
    db: Mutex<Connection>,
}

impl ThreadStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    #[instrument(skip(self))]
    pub fn create_thread(&self, user_id: &str) -> Result<Thread> {
        let id = ThreadId::new().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO threads (id, user_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![id, user_id, now],
        )?;
        debug!(thread_id = %id, "thread created");
        Ok(Thread {
            id,
            user_id: user_id.to_string(),
            title: None,
            message_count: 0,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Retrieve a thread by id, returning `None` if it does not exist.
    #[instrument(skip(self))]
    pub fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("{THREAD_SELECT} WHERE t.id = ?1"),
            params![thread_id],
            row_to_thread,
        ) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ThreadError::Database(e)),
        }
    }

    /// Most-recently-updated threads for a user, newest first.
    #[instrument(skip(self))]
    pub fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<Thread>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "{THREAD_SELECT} WHERE t.user_id = ?1 ORDER BY t.updated_at DESC, t.id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![user_id, limit as i64], row_to_thread)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Append a user message and its reply in one transaction. Either both
    /// are stored or neither is.
    #[instrument(skip(self, user, assistant))]
    pub fn append_turn(
        &self,
        thread_id: &str,
        user: &NewMessage<'_>,
        assistant: &NewMessage<'_>,
    ) -> Result<(StoredMessage, StoredMessage)> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        touch_thread(&tx, thread_id, &now)?;
        let stored_user = insert_message(&tx, thread_id, user, &now)?;
        let stored_assistant = insert_message(&tx, thread_id, assistant, &now)?;
        tx.commit()?;
        Ok((stored_user, stored_assistant))
    }

    /// The latest `limit` messages of a thread, oldest first.
    #[instrument(skip(self))]
    pub fn history(&self, thread_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM (
                SELECT {MESSAGE_COLUMNS} FROM messages
                WHERE thread_id = ?1 ORDER BY id DESC LIMIT ?2
             ) ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![thread_id, limit as i64], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    #[instrument(skip(self))]
    pub fn message_count(&self, thread_id: &str) -> Result<u32> {
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM messages WHERE thread_id = ?1",
            params![thread_id],
            |r| r.get(0),
        )?;
        Ok(n as u32)
    }

    /// Set the display title. Called by the background title task.
    #[instrument(skip(self))]
    pub fn update_thread_title(&self, thread_id: &str, title: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE threads SET title = ?2 WHERE id = ?1",
            params![thread_id, title],
        )?;
        if rows_changed == 0 {
            return Err(ThreadError::NotFound {
                id: thread_id.to_string(),
            });
        }
        Ok(())
    }

    /// Permanently delete a thread and its messages.
    #[instrument(skip(self))]
    pub fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute("DELETE FROM messages WHERE thread_id = ?1", params![thread_id])?;
        let rows_changed = tx.execute("DELETE FROM threads WHERE id = ?1", params![thread_id])?;
        if rows_changed == 0 {
            return Err(ThreadError::NotFound {
                id: thread_id.to_string(),
            });
        }
        tx.commit()?;
        Ok(())
    }
}

fn touch_thread(db: &Connection, thread_id: &str, now: &str) -> Result<()> {
    let touched = db.execute(
        "UPDATE threads SET updated_at = ?2 WHERE id = ?1",
        params![thread_id, now],
    )?;
    if touched == 0 {
        return Err(ThreadError::NotFound {
            id: thread_id.to_string(),
        });
    }
    Ok(())
}

fn insert_message(
    db: &Connection,
    thread_id: &str,
    msg: &NewMessage<'_>,
    now: &str,
) -> Result<StoredMessage> {
    db.execute(
        "INSERT INTO messages
         (thread_id, role, content, thinking, thinking_seconds, model, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            thread_id,
            msg.role.as_str(),
            msg.content,
            msg.thinking,
            msg.thinking_seconds.map(|s| s as i64),
            msg.model,
            now
        ],
    )?;

    Ok(StoredMessage {
        id: db.last_insert_rowid(),
        thread_id: thread_id.to_string(),
        role: msg.role,
        content: msg.content.to_string(),
        thinking: msg.thinking.map(str::to_string),
        thinking_seconds: msg.thinking_seconds,
        model: msg.model.map(str::to_string),
        created_at: now.to_string(),
    })
}

/// Map a SQLite row (THREAD_SELECT column order) to a `Thread`.
fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        message_count: row.get::<_, i64>(5)? as u32,
    })
}

/// Map a SQLite row (MESSAGE_COLUMNS order) to a `StoredMessage`.
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    // Unknown roles come from manual edits; show them as user text rather than failing.
    let role = MessageRole::from_str(&row.get::<_, String>(2)?).unwrap_or(MessageRole::User);
    Ok(StoredMessage {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        role,
        content: row.get(3)?,
        thinking: row.get(4)?,
        thinking_seconds: row.get::<_, Option<i64>>(5)?.map(|s| s as u64),
        model: row.get(6)?,
        created_at: row.get(7)?,
    })
}
