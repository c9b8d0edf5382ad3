//! File-based storage implementations.
//!
//! Documents are stored as YAML. Every write goes to a temp file first and is
//! renamed into place, so readers never see a partial document.

mod credentials;
mod message;

pub use credentials::FileCredentialStore;
pub use message::FileMessageStore;

use std::path::Path;

use tokio::fs;

use super::error::{StorageError, StorageResult};

/// Serialize `value` as YAML and atomically replace `path` with it.
async fn write_yaml_atomic<T: serde::Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let yaml =
        serde_saphyr::to_string(value).map_err(|e| StorageError::serialization(e.to_string()))?;

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = std::path::PathBuf::from(temp_path);

    fs::write(&temp_path, yaml.as_bytes())
        .await
        .map_err(|e| StorageError::file_io(&temp_path, e))?;
    fs::rename(&temp_path, path)
        .await
        .map_err(|e| StorageError::file_io(path, e))
}

/// Read and parse a YAML document. A missing file yields `None`.
async fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    let contents = match fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::file_io(path, e)),
    };

    serde_saphyr::from_str(&contents)
        .map(Some)
        .map_err(|e| StorageError::file_deserialization(path, e.to_string()))
}
