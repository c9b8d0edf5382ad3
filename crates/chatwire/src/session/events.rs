//! Events published by session actors.
//!
//! Two streams per session: coarse lifecycle notifications for
//! orchestration, and raw transport events (with a metadata snapshot) for
//! consumers that need the full detail.

use std::collections::BTreeMap;

use chatwire_transport::MessageStatusUpdate;
use serde::{Deserialize, Serialize};

/// Session metadata: open string-keyed map, accumulated over the session's
/// life. Keys are overwritten in place and never removed.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Latest connection update, as reported by the transport.
pub const META_CONNECTION_STATE: &str = "connection_state";
/// Id of the linked account.
pub const META_LINKED_ID: &str = "linked_id";
/// Platform of the linked device.
pub const META_PLATFORM: &str = "platform";

/// Coarse session lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// `start()` was called.
    Starting,
    /// A pairing code is available for scanning.
    QrCode(String),
    /// The connection is open. Carries a metadata snapshot.
    Connected(Metadata),
    /// The transport asked for a restart; a reconnect is scheduled.
    UnexpectedDisconnection,
    /// The session ended. Always the last event on the stream.
    LoggedOut,
}

impl LifecycleEvent {
    /// Wire name of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::QrCode(_) => "qr_code",
            Self::Connected(_) => "connected",
            Self::UnexpectedDisconnection => "unexpected_disconnection",
            Self::LoggedOut => "logged_out",
        }
    }

    pub fn is_logged_out(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

/// Transport event republished with the session's metadata at that moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RawEvent {
    #[serde(rename = "creds.update")]
    CredsUpdate { metadata: Metadata },
    #[serde(rename = "connection.update")]
    ConnectionUpdate { metadata: Metadata },
    #[serde(rename = "messages.update")]
    MessagesUpdate {
        metadata: Metadata,
        updates: Vec<MessageStatusUpdate>,
    },
}

impl RawEvent {
    pub fn metadata(&self) -> &Metadata {
        match self {
            Self::CredsUpdate { metadata }
            | Self::ConnectionUpdate { metadata }
            | Self::MessagesUpdate { metadata, .. } => metadata,
        }
    }
}

/// Lifecycle event tagged with its session, as seen on the registry's
/// global stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalEvent {
    pub session_id: String,
    #[serde(flatten)]
    pub event: LifecycleEvent,
}
