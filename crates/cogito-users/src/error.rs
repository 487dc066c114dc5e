use thiserror::Error;

/// All user-layer errors. Kept separate from CogitoError so the gateway
/// can map them to WS response codes without coupling layers.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Password hashing failed: {0}")]
    Hash(String),
}

pub type Result<T> = std::result::Result<T, UserError>;

impl From<UserError> for cogito_core::CogitoError {
    fn from(e: UserError) -> Self {
        match e {
            UserError::NotFound(name) => cogito_core::CogitoError::NotFound {
                what: format!("user {name}"),
            },
            UserError::InvalidInput(msg) => cogito_core::CogitoError::InvalidParams(msg),
            UserError::DatabaseError(e) => cogito_core::CogitoError::Database(e.to_string()),
            UserError::Hash(msg) => cogito_core::CogitoError::Internal(msg),
        }
    }
}
