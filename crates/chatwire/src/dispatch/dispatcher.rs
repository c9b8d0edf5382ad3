//! Outbound message pipeline.
//!
//! Sends a message through a session, validates the transport's answer,
//! records it, and applies delivery status changes reported later.

use std::sync::Arc;

use chatwire_transport::SendResult;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::{RawEvent, SessionHandle, SessionRegistry};
use crate::store::{MessageStore, StorageError};

use super::lookup::{ConnectionLookup, SessionLookup};
use super::record::MessageRecord;
use super::status::MessageStatus;

/// Errors from the dispatch pipeline.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Session state exists but it holds no connection.
    #[error("session {0} has no connection")]
    SocketMissing(String),

    /// A connection exists but no session state does.
    #[error("session {0} has a connection but no state")]
    StateMissing(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    /// The transport answered without a message id or status.
    #[error("transport returned an incomplete send result")]
    IncompleteSendResult,

    #[error("message not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(StorageError),
}

impl From<StorageError> for DispatchError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { id, .. } => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

// ============================================================================
// Message Dispatcher
// ============================================================================

#[derive(Clone)]
pub struct MessageDispatcher {
    connections: Arc<dyn ConnectionLookup>,
    sessions: Arc<dyn SessionLookup>,
    messages: Arc<dyn MessageStore>,
}

impl MessageDispatcher {
    pub fn new(
        connections: Arc<dyn ConnectionLookup>,
        sessions: Arc<dyn SessionLookup>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            connections,
            sessions,
            messages,
        }
    }

    /// Dispatcher backed by a registry for both lookups.
    pub fn for_registry(registry: SessionRegistry, messages: Arc<dyn MessageStore>) -> Self {
        let registry = Arc::new(registry);
        Self::new(registry.clone(), registry, messages)
    }

    /// Send a text message through a session and record it.
    ///
    /// Returns the transport's raw result. Nothing is retried.
    pub async fn send_message(
        &self,
        session_id: &str,
        to: &str,
        content: &str,
    ) -> Result<SendResult, DispatchError> {
        let has_connection = self.connections.has_connection(session_id);
        let has_session = self.sessions.has_session(session_id);
        match (has_connection, has_session) {
            (false, false) => return Err(DispatchError::SessionNotFound(session_id.to_string())),
            (false, true) => return Err(DispatchError::SocketMissing(session_id.to_string())),
            (true, false) => return Err(DispatchError::StateMissing(session_id.to_string())),
            (true, true) => {}
        }

        let result = self
            .connections
            .send(session_id, to, content)
            .await
            .map_err(|e| DispatchError::SendFailed(e.to_string()))?
            .ok_or_else(|| {
                DispatchError::SendFailed("transport returned no message".to_string())
            })?;

        let (Some(message_id), Some(code)) = (result.message_id.as_deref(), result.status) else {
            return Err(DispatchError::IncompleteSendResult);
        };

        let status = MessageStatus::from_transport(code);
        let record = MessageRecord::new(message_id, session_id, to, content, status);
        self.messages
            .create(&record)
            .await
            .map_err(DispatchError::Store)?;

        info!(
            session_id = %session_id,
            message_id = %message_id,
            status = %status,
            "Message sent"
        );
        Ok(result)
    }

    /// Apply a transport-reported status code to a stored message.
    pub async fn update_message_status(
        &self,
        message_id: &str,
        code: i32,
    ) -> Result<MessageStatus, DispatchError> {
        let status = MessageStatus::from_transport(code);
        self.messages.update_status(message_id, status).await?;
        debug!(message_id = %message_id, status = %status, "Message status updated");
        Ok(status)
    }

    /// Apply every status report from `session` until its raw stream closes.
    ///
    /// Subscribes before returning, so reports emitted after this call are
    /// seen. Reports lost to lag are logged with the number of skipped
    /// events.
    pub fn follow(&self, session: &SessionHandle) -> JoinHandle<()> {
        let dispatcher = self.clone();
        let session_id = session.id().to_string();
        let events = session.subscribe_raw();

        tokio::spawn(async move {
            let stats = dispatcher.apply_reports(&session_id, events).await;
            debug!(
                session_id = %session_id,
                applied = stats.applied,
                unknown = stats.unknown,
                failed = stats.failed,
                skipped_events = stats.skipped_events,
                "Status follower stopped"
            );
        })
    }

    async fn apply_reports(
        &self,
        session_id: &str,
        mut events: broadcast::Receiver<RawEvent>,
    ) -> FollowStats {
        let mut stats = FollowStats::default();

        loop {
            let updates = match events.recv().await {
                Ok(RawEvent::MessagesUpdate { updates, .. }) => updates,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        session_id = %session_id,
                        skipped,
                        "Status follower lagged, status reports were lost"
                    );
                    stats.skipped_events += skipped;
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            for update in updates {
                match self
                    .update_message_status(&update.message_id, update.status)
                    .await
                {
                    Ok(_) => stats.applied += 1,
                    Err(DispatchError::NotFound(id)) => {
                        stats.unknown += 1;
                        debug!(
                            session_id = %session_id,
                            message_id = %id,
                            "Status report for unknown message"
                        );
                    }
                    Err(e) => {
                        stats.failed += 1;
                        warn!(
                            session_id = %session_id,
                            message_id = %update.message_id,
                            error = %e,
                            "Failed to apply status report"
                        );
                    }
                }
            }
        }

        stats
    }
}

/// Outcome counts of one status follower.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct FollowStats {
    applied: u64,
    unknown: u64,
    failed: u64,
    /// Raw events dropped because the follower fell behind.
    skipped_events: u64,
}
