//! Shared configuration, error and identifier types for the Cogito workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::CogitoConfig;
pub use error::{CogitoError, Result};
