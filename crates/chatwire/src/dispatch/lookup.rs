//! Seams between the dispatcher and whatever owns the sessions.

use async_trait::async_trait;
use chatwire_transport::SendResult;

use crate::session::SessionError;

/// Answers whether session state exists for an id.
pub trait SessionLookup: Send + Sync {
    fn has_session(&self, session_id: &str) -> bool;
}

/// Answers whether a session holds a live connection, and sends over it.
#[async_trait]
pub trait ConnectionLookup: Send + Sync {
    fn has_connection(&self, session_id: &str) -> bool;

    async fn send(
        &self,
        session_id: &str,
        to: &str,
        content: &str,
    ) -> Result<Option<SendResult>, SessionError>;
}
