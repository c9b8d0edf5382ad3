//! Session actor types and protocol.
//!
//! This module defines the command protocol for communicating with session
//! actors, along with configuration, state and error types.

use std::sync::Arc;

use chatwire_transport::{ConnectOptions, ConnectionFactory, SendResult, TransportError};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::store::{CredentialStore, StorageError};

use super::events::Metadata;
use super::reconnect::ReconnectPolicy;

// ============================================================================
// Session Command
// ============================================================================

/// Commands that can be sent to a session actor.
pub enum SessionCommand {
    Start {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SendMessage {
        to: String,
        content: String,
        reply: oneshot::Sender<Result<Option<SendResult>, SessionError>>,
    },
    GetMetadata {
        reply: oneshot::Sender<Metadata>,
    },
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// `start()` was called on a session that already left `Created`.
    #[error("session already started")]
    AlreadyStarted,

    /// The session holds no connection.
    #[error("session is not connected")]
    NotConnected,

    /// The actor has shut down.
    #[error("actor has shut down")]
    ActorShutdown,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ============================================================================
// State
// ============================================================================

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Spawned, `start()` not called yet.
    Created,
    /// Loading credentials and opening the connection.
    Starting,
    /// Connection established, waiting for it to open.
    Connecting,
    Connected,
    /// Restart-required disconnect; a reconnect is pending.
    Reconnecting,
    /// Terminal.
    LoggedOut,
}

impl SessionState {
    /// Whether a session in this state owns a connection.
    pub fn has_connection(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }

    pub fn is_terminal(self) -> bool {
        self == Self::LoggedOut
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::LoggedOut => "logged_out",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Tunables shared by every session of a registry.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connect_options: ConnectOptions,
    pub reconnect: ReconnectPolicy,
    /// Buffer size of each session's broadcast channels.
    pub event_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_options: ConnectOptions::default(),
            reconnect: ReconnectPolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Configuration for spawning a new actor.
pub struct ActorConfig {
    pub id: String,
    pub credentials: Arc<dyn CredentialStore>,
    pub factory: Arc<dyn ConnectionFactory>,
    pub settings: SessionSettings,
}

// ============================================================================
// Constants
// ============================================================================

/// Channel capacity for commands.
pub const CHANNEL_CAPACITY: usize = 64;

/// Default buffer size of lifecycle and raw event channels.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_states() {
        assert!(!SessionState::Created.has_connection());
        assert!(!SessionState::Starting.has_connection());
        assert!(SessionState::Connecting.has_connection());
        assert!(SessionState::Connected.has_connection());
        assert!(SessionState::Reconnecting.has_connection());
        assert!(!SessionState::LoggedOut.has_connection());
    }

    #[test]
    fn only_logged_out_is_terminal() {
        assert!(SessionState::LoggedOut.is_terminal());
        assert!(!SessionState::Reconnecting.is_terminal());
    }
}
