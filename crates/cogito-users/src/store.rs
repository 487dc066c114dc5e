use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{info, instrument, warn};

use cogito_core::types::{UserId, UserRole};

use crate::db::{row_to_user, USER_COLUMNS};
use crate::error::{Result, UserError};
use crate::password::{hash_password, verify_password};
use crate::types::User;

/// Password-authenticated user accounts backed by SQLite.
pub struct UserStore {
    db: Mutex<Connection>,
}

impl UserStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Insert a user, or replace the password and role of an existing one.
    #[instrument(skip(self, password))]
    pub fn create_or_update(
        &self,
        username: &str,
        password: &str,
        role: UserRole,
    ) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(UserError::InvalidInput("username must not be empty".to_string()));
        }
        if password.is_empty() {
            return Err(UserError::InvalidInput("password must not be empty".to_string()));
        }

        let hash = hash_password(password)?;
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();

        let updated = db.execute(
            "UPDATE users SET password_hash = ?2, role = ?3, updated_at = ?4 WHERE username = ?1",
            params![username, hash, role.to_string(), now],
        )?;
        if updated == 0 {
            db.execute(
                "INSERT INTO users (id, username, role, password_hash, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![UserId::new().as_str(), username, role.to_string(), hash, now],
            )?;
            info!(username, "user created");
        } else {
            info!(username, "user updated");
        }

        find_by_username(&db, username)?.ok_or_else(|| UserError::NotFound(username.to_string()))
    }

    /// Returns the user when the password matches, `None` otherwise.
    /// Unknown usernames and wrong passwords are indistinguishable to the caller.
    #[instrument(skip(self, password))]
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>> {
        let user = {
            let db = self.db.lock().unwrap();
            find_by_username(&db, username.trim())?
        };

        // verify outside the lock
        match user {
            Some(user) if verify_password(password, &user.password_hash) => Ok(Some(user)),
            Some(_) => {
                warn!(username, "password mismatch");
                Ok(None)
            }
            None => {
                warn!(username, "unknown username");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self))]
    pub fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let db = self.db.lock().unwrap();
        find_by_username(&db, username)
    }

    #[instrument(skip(self))]
    pub fn get(&self, user_id: &str) -> Result<Option<User>> {
        let db = self.db.lock().unwrap();
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        match db.query_row(&sql, params![user_id], row_to_user) {
            Ok(u) => Ok(Some(u)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(UserError::DatabaseError(e)),
        }
    }

    /// All users, oldest first.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<User>> {
        let db = self.db.lock().unwrap();
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at, username");
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_user)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn count(&self) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

fn find_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1");
    match conn.query_row(&sql, params![username], row_to_user) {
        Ok(u) => Ok(Some(u)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(UserError::DatabaseError(e)),
    }
}
