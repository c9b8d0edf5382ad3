//! Stored record of an outbound message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::MessageStatus;

/// Persisted record of a message sent through a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Transport-assigned id; the record's key.
    pub message_id: String,
    pub session_id: String,
    /// Recipient address.
    pub to: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub updated_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn new(
        message_id: impl Into<String>,
        session_id: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
        status: MessageStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            message_id: message_id.into(),
            session_id: session_id.into(),
            to: to.into(),
            content: content.into(),
            sent_at: now,
            status,
            updated_at: now,
        }
    }
}
