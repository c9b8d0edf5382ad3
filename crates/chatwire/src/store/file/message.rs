//! File-based message record storage.
//!
//! One YAML document per record at `{messages_dir}/{message_id}.yaml`.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;

use crate::dispatch::{MessageRecord, MessageStatus};
use crate::store::error::{StorageError, StorageResult, validate_id};
use crate::store::message::MessageStore;
use crate::sync::KeyedLocks;

use super::{read_yaml, write_yaml_atomic};

/// File-based implementation of `MessageStore`.
///
/// Status updates are read-modify-write, serialized per message id.
#[derive(Debug, Clone)]
pub struct FileMessageStore {
    messages_dir: PathBuf,
    locks: KeyedLocks,
}

impl FileMessageStore {
    pub fn new(messages_dir: impl Into<PathBuf>) -> Self {
        Self {
            messages_dir: messages_dir.into(),
            locks: KeyedLocks::new(),
        }
    }

    /// Path of one record. Fails for ids that are not a plain file name.
    fn record_path(&self, message_id: &str) -> StorageResult<PathBuf> {
        validate_id("message", message_id)?;
        Ok(self.messages_dir.join(format!("{message_id}.yaml")))
    }

    async fn ensure_dir(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.messages_dir)
            .await
            .map_err(|e| StorageError::file_io(&self.messages_dir, e))
    }

    async fn create_locked(&self, record: &MessageRecord) -> StorageResult<()> {
        let path = self.record_path(&record.message_id)?;
        let exists = fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::file_io(&path, e))?;
        if exists {
            return Err(StorageError::already_exists("message", &record.message_id));
        }

        self.ensure_dir().await?;
        write_yaml_atomic(&path, record).await
    }

    async fn update_status_locked(
        &self,
        message_id: &str,
        status: MessageStatus,
    ) -> StorageResult<()> {
        let path = self.record_path(message_id)?;
        let mut record: MessageRecord = read_yaml(&path)
            .await?
            .ok_or_else(|| StorageError::not_found("message", message_id))?;

        record.status = status;
        record.updated_at = Utc::now();
        write_yaml_atomic(&path, &record).await
    }
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn create(&self, record: &MessageRecord) -> StorageResult<()> {
        let lock = self.locks.get(&record.message_id);
        let result = {
            let _guard = lock.lock().await;
            self.create_locked(record).await
        };
        drop(lock);
        self.locks.release(&record.message_id);
        result
    }

    async fn update_status(&self, message_id: &str, status: MessageStatus) -> StorageResult<()> {
        let lock = self.locks.get(message_id);
        let result = {
            let _guard = lock.lock().await;
            self.update_status_locked(message_id, status).await
        };
        drop(lock);
        self.locks.release(message_id);
        result
    }

    async fn get(&self, message_id: &str) -> StorageResult<Option<MessageRecord>> {
        read_yaml(&self.record_path(message_id)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str, status: MessageStatus) -> MessageRecord {
        MessageRecord::new(id, "s1", "5511999999999", "hi", status)
    }

    #[tokio::test]
    async fn create_then_get() {
        let temp = TempDir::new().unwrap();
        let store = FileMessageStore::new(temp.path().join("messages"));

        store
            .create(&record("ABC123", MessageStatus::ServerAck))
            .await
            .unwrap();

        let loaded = store.get("ABC123").await.unwrap().unwrap();
        assert_eq!(loaded.session_id, "s1");
        assert_eq!(loaded.to, "5511999999999");
        assert_eq!(loaded.status, MessageStatus::ServerAck);
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let temp = TempDir::new().unwrap();
        let store = FileMessageStore::new(temp.path());

        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_create_keeps_first_record() {
        let temp = TempDir::new().unwrap();
        let store = FileMessageStore::new(temp.path());

        store
            .create(&record("ABC123", MessageStatus::ServerAck))
            .await
            .unwrap();
        let err = store
            .create(&record("ABC123", MessageStatus::Error))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        let loaded = store.get("ABC123").await.unwrap().unwrap();
        assert_eq!(loaded.status, MessageStatus::ServerAck);
    }

    #[tokio::test]
    async fn update_status_persists() {
        let temp = TempDir::new().unwrap();
        let store = FileMessageStore::new(temp.path());
        let original = record("ABC123", MessageStatus::ServerAck);
        store.create(&original).await.unwrap();

        store
            .update_status("ABC123", MessageStatus::Read)
            .await
            .unwrap();

        let reopened = FileMessageStore::new(temp.path());
        let loaded = reopened.get("ABC123").await.unwrap().unwrap();
        assert_eq!(loaded.status, MessageStatus::Read);
        assert_eq!(loaded.sent_at, original.sent_at);
        assert!(loaded.updated_at >= original.updated_at);
    }

    #[tokio::test]
    async fn update_status_unknown_id_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = FileMessageStore::new(temp.path());

        let err = store
            .update_status("ghost", MessageStatus::Read)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!temp.path().join("ghost.yaml").exists());
    }

    #[tokio::test]
    async fn locks_are_released_after_each_operation() {
        let temp = TempDir::new().unwrap();
        let store = FileMessageStore::new(temp.path());

        for n in 0..50 {
            let id = format!("MSG{n}");
            store
                .create(&record(&id, MessageStatus::Pending))
                .await
                .unwrap();
            store.update_status(&id, MessageStatus::Read).await.unwrap();
        }
        let _ = store.update_status("ghost", MessageStatus::Read).await;

        assert!(store.locks.is_empty());
    }

    #[tokio::test]
    async fn path_like_message_ids_are_rejected() {
        let temp = TempDir::new().unwrap();
        let messages_dir = temp.path().join("messages");
        let store = FileMessageStore::new(&messages_dir);

        for id in ["", "..", "../escape", ".hidden"] {
            let err = store
                .create(&record(id, MessageStatus::Pending))
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::InvalidId { .. }), "{id:?}");
            assert!(store.get(id).await.is_err());
        }
        assert!(!temp.path().join("escape.yaml").exists());
        assert!(store.locks.is_empty());
    }
}
