use thiserror::Error;

#[derive(Debug, Error)]
pub enum CogitoError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("WebSocket protocol error: {0}")]
    Protocol(String),

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CogitoError {
    /// Short error code string sent to clients in WS RES frames.
    pub fn code(&self) -> &'static str {
        match self {
            CogitoError::Config(_) => "CONFIG_ERROR",
            CogitoError::AuthFailed(_) => "AUTH_FAILED",
            CogitoError::Protocol(_) => "PROTOCOL_ERROR",
            CogitoError::MethodNotFound { .. } => "METHOD_NOT_FOUND",
            CogitoError::InvalidParams(_) => "INVALID_PARAMS",
            CogitoError::PermissionDenied { .. } => "PERMISSION_DENIED",
            CogitoError::NotFound { .. } => "NOT_FOUND",
            CogitoError::Database(_) => "DATABASE_ERROR",
            CogitoError::Upstream(_) => "UPSTREAM_ERROR",
            CogitoError::Serialization(_) => "SERIALIZATION_ERROR",
            CogitoError::Io(_) => "IO_ERROR",
            CogitoError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            CogitoError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CogitoError>;
