//! Credential storage trait.

use async_trait::async_trait;
use chatwire_transport::{AuthState, Credentials};

use super::error::StorageResult;

/// Per-session authentication material.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the auth state for a session.
    ///
    /// A session with nothing stored yields `AuthState::default()`, an unpaired
    /// device.
    async fn load(&self, session_id: &str) -> StorageResult<AuthState>;

    /// Persist updated credentials, replacing whatever was stored.
    async fn save(&self, session_id: &str, creds: &Credentials) -> StorageResult<()>;

    /// Erase a session's credentials. Deleting a missing session succeeds.
    async fn delete(&self, session_id: &str) -> StorageResult<()>;

    /// List session ids that have stored credentials.
    async fn list(&self) -> StorageResult<Vec<String>>;
}
