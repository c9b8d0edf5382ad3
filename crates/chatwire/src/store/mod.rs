//! Storage abstraction layer.
//!
//! Traits for credential and message persistence, with file-based and
//! in-memory backends.

pub mod credentials;
pub mod error;
pub mod file;
pub mod memory;
pub mod message;

pub use credentials::CredentialStore;
pub use error::{StorageError, StorageResult, is_valid_id, validate_id};
pub use file::{FileCredentialStore, FileMessageStore};
pub use memory::{MemoryCredentialStore, MemoryMessageStore};
pub use message::MessageStore;
