//! CLI command implementations.

use std::path::Path;

use anyhow::{Context, Result};

use chatwire::config::Config;
use chatwire::store::FileCredentialStore;

pub mod doctor;
pub mod sessions;

/// Load the config and open the credential store it points at.
async fn open_credentials(config_path: &str) -> Result<FileCredentialStore> {
    let config = Config::load(config_path)
        .await
        .with_context(|| format!("failed to load config '{config_path}'"))?;
    Ok(FileCredentialStore::new(
        config.credentials_dir(Path::new(config_path)),
    ))
}
