pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::ThreadError;
pub use store::ThreadStore;
pub use types::{MessageRole, NewMessage, StoredMessage, Thread};
