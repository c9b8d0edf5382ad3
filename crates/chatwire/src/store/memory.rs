//! In-memory store implementations.
//!
//! Nothing survives a restart. Useful for embedding and tests.

use async_trait::async_trait;
use chatwire_transport::{AuthState, Credentials};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::dispatch::{MessageRecord, MessageStatus};

use super::credentials::CredentialStore;
use super::error::{StorageError, StorageResult};
use super::message::MessageStore;

// ============================================================================
// Credentials
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    creds: DashMap<String, Credentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether credentials are stored for a session.
    pub fn contains(&self, session_id: &str) -> bool {
        self.creds.contains_key(session_id)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, session_id: &str) -> StorageResult<AuthState> {
        let creds = self
            .creds
            .get(session_id)
            .map(|c| c.clone())
            .unwrap_or_default();
        Ok(AuthState::new(creds))
    }

    async fn save(&self, session_id: &str, creds: &Credentials) -> StorageResult<()> {
        self.creds.insert(session_id.to_string(), creds.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> StorageResult<()> {
        self.creds.remove(session_id);
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<String>> {
        let mut ids: Vec<String> = self.creds.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    records: DashMap<String, MessageRecord>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(&self, record: &MessageRecord) -> StorageResult<()> {
        match self.records.entry(record.message_id.clone()) {
            Entry::Occupied(_) => Err(StorageError::already_exists(
                "message",
                &record.message_id,
            )),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn update_status(&self, message_id: &str, status: MessageStatus) -> StorageResult<()> {
        let mut record = self
            .records
            .get_mut(message_id)
            .ok_or_else(|| StorageError::not_found("message", message_id))?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, message_id: &str) -> StorageResult<Option<MessageRecord>> {
        Ok(self.records.get(message_id).map(|r| r.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatwire_transport::LinkedIdentity;

    fn record(id: &str) -> MessageRecord {
        MessageRecord::new(id, "s1", "5511999999999", "hi", MessageStatus::Pending)
    }

    #[tokio::test]
    async fn load_missing_credentials_returns_unpaired_state() {
        let store = MemoryCredentialStore::new();
        let auth = store.load("nobody").await.unwrap();
        assert_eq!(auth, AuthState::default());
    }

    #[tokio::test]
    async fn credentials_save_load_delete() {
        let store = MemoryCredentialStore::new();
        let creds = Credentials {
            me: Some(LinkedIdentity::new("5511999999999@s.example")),
            platform: Some("android".to_string()),
            ..Default::default()
        };

        store.save("s1", &creds).await.unwrap();
        assert_eq!(store.load("s1").await.unwrap().creds, creds);
        assert_eq!(store.list().await.unwrap(), vec!["s1".to_string()]);

        store.delete("s1").await.unwrap();
        store.delete("s1").await.unwrap();
        assert!(!store.contains("s1"));
    }

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let store = MemoryMessageStore::new();
        store.create(&record("ABC123")).await.unwrap();

        let err = store.create(&record("ABC123")).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn update_status_mutates_in_place() {
        let store = MemoryMessageStore::new();
        store.create(&record("ABC123")).await.unwrap();

        store
            .update_status("ABC123", MessageStatus::Read)
            .await
            .unwrap();

        let loaded = store.get("ABC123").await.unwrap().unwrap();
        assert_eq!(loaded.status, MessageStatus::Read);
        assert_eq!(loaded.content, "hi");
    }

    #[tokio::test]
    async fn update_status_unknown_id_is_not_found() {
        let store = MemoryMessageStore::new();
        let err = store
            .update_status("missing", MessageStatus::Read)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
