//! `chatwire sessions` and `chatwire purge`: inspect stored credentials.

use anyhow::Result;

use chatwire::store::CredentialStore;

use super::open_credentials;

pub async fn list(config_path: &str) -> Result<()> {
    let store = open_credentials(config_path).await?;
    let ids = store.list().await?;

    if ids.is_empty() {
        println!("No sessions with stored credentials.");
        return Ok(());
    }

    for id in ids {
        let auth = store.load(&id).await?;
        match auth.creds.me {
            Some(me) => println!("{id}\tpaired as {}", me.id),
            None => println!("{id}\tnot paired"),
        }
    }
    Ok(())
}

pub async fn purge(session_id: &str, config_path: &str) -> Result<()> {
    let store = open_credentials(config_path).await?;
    store.delete(session_id).await?;
    println!("Purged credentials for session '{session_id}'.");
    Ok(())
}
