use thiserror::Error;

/// Errors that can occur during thread operations.
#[derive(Debug, Error)]
pub enum ThreadError {
    /// The requested thread does not exist in the database.
    #[error("thread not found: {id}")]
    NotFound { id: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, ThreadError>;

impl From<ThreadError> for cogito_core::CogitoError {
    fn from(e: ThreadError) -> Self {
        match e {
            ThreadError::NotFound { id } => cogito_core::CogitoError::NotFound {
                what: format!("thread {id}"),
            },
            ThreadError::Database(e) => cogito_core::CogitoError::Database(e.to_string()),
        }
    }
}
