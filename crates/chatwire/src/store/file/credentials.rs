//! File-based credential storage.
//!
//! Directory structure:
//! ```text
//! {credentials_dir}/
//!   {session_id}/
//!     creds.yaml         # Atomic snapshot of the latest credentials
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use chatwire_transport::{AuthState, Credentials};
use tokio::fs;

use crate::store::credentials::CredentialStore;
use crate::store::error::{StorageError, StorageResult, validate_id};

use super::{read_yaml, write_yaml_atomic};

const CREDS_FILE: &str = "creds.yaml";

/// File-based implementation of `CredentialStore`.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    credentials_dir: PathBuf,
}

impl FileCredentialStore {
    /// Create a new store rooted at `credentials_dir`.
    ///
    /// Directories are created lazily on the first save.
    pub fn new(credentials_dir: impl Into<PathBuf>) -> Self {
        Self {
            credentials_dir: credentials_dir.into(),
        }
    }

    /// Directory of one session. Fails for ids that would resolve outside
    /// their own directory.
    fn session_dir(&self, session_id: &str) -> StorageResult<PathBuf> {
        validate_id("session", session_id)?;
        Ok(self.credentials_dir.join(session_id))
    }

    fn creds_path(&self, session_id: &str) -> StorageResult<PathBuf> {
        Ok(self.session_dir(session_id)?.join(CREDS_FILE))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, session_id: &str) -> StorageResult<AuthState> {
        let creds: Option<Credentials> = read_yaml(&self.creds_path(session_id)?).await?;
        Ok(AuthState::new(creds.unwrap_or_default()))
    }

    async fn save(&self, session_id: &str, creds: &Credentials) -> StorageResult<()> {
        let dir = self.session_dir(session_id)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::file_io(&dir, e))?;

        write_yaml_atomic(&dir.join(CREDS_FILE), creds).await
    }

    async fn delete(&self, session_id: &str) -> StorageResult<()> {
        let dir = self.session_dir(session_id)?;

        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::file_io(&dir, e)),
        }
    }

    async fn list(&self) -> StorageResult<Vec<String>> {
        let mut sessions = Vec::new();

        let mut entries = match fs::read_dir(&self.credentials_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(&self.credentials_dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::file_io(&self.credentials_dir, e))?
        {
            let path = entry.path();
            if path.is_dir()
                && path.join(CREDS_FILE).exists()
                && let Some(name) = path.file_name()
            {
                sessions.push(name.to_string_lossy().to_string());
            }
        }

        sessions.sort();
        Ok(sessions)
    }
}
