//! Message storage trait.

use async_trait::async_trait;

use crate::dispatch::{MessageRecord, MessageStatus};

use super::error::StorageResult;

/// Storage for outbound message records.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Store a new record. Fails with `AlreadyExists` when the id is taken.
    async fn create(&self, record: &MessageRecord) -> StorageResult<()>;

    /// Overwrite the delivery status of an existing record.
    ///
    /// Fails with `NotFound` when no record has this id.
    async fn update_status(&self, message_id: &str, status: MessageStatus) -> StorageResult<()>;

    /// Load a record by transport message id.
    async fn get(&self, message_id: &str) -> StorageResult<Option<MessageRecord>>;
}
