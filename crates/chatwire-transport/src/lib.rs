//! Transport contract between chatwire sessions and a messaging transport.
//!
//! A transport implementation (the library that speaks the wire protocol,
//! performs the cryptographic handshake and device pairing) plugs into
//! chatwire by implementing [`ConnectionFactory`] and [`Connection`].
//!
//! # Event Flow
//!
//! ```text
//!  ConnectionFactory::connect ──▶ Established { connection, events }
//!                                        │            │
//!   Session actor ◀── send/logout/close ─┘            │ mpsc
//!   Session actor ◀── TransportEvent ─────────────────┘
//! ```
//!
//! Events are pushed into a bounded channel owned by the session; dropping the
//! receiver detaches the session from the transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// Authentication Material
// ============================================================================

/// Authentication material persisted between connections.
///
/// Only `me` and `platform` are interpreted by chatwire; the transport keeps
/// its key material in `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    /// Identity of the linked account, once pairing completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<LinkedIdentity>,
    /// Platform reported by the paired device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Opaque transport key material.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl Credentials {
    /// Whether these credentials belong to a paired device.
    pub fn is_registered(&self) -> bool {
        self.me.is_some()
    }
}

/// Identity of the account a session is linked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedIdentity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl LinkedIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// State handed to the factory when opening a connection.
///
/// The default value describes an unpaired device; the transport will
/// produce a pairing code for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    pub creds: Credentials,
}

impl AuthState {
    pub fn new(creds: Credentials) -> Self {
        Self { creds }
    }
}

// ============================================================================
// Connection Updates
// ============================================================================

/// Coarse connection status reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Close,
}

/// Details about the most recent disconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastDisconnect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Partial connection state. Every field is optional; the transport only
/// sets what changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionStatus>,
    /// Pairing payload to render as a QR code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_disconnect: Option<LastDisconnect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_new_login: Option<bool>,
}

impl ConnectionUpdate {
    /// An update carrying only a pairing code.
    pub fn qr(qr: impl Into<String>) -> Self {
        Self {
            qr: Some(qr.into()),
            ..Default::default()
        }
    }

    /// An update signalling the connection opened.
    pub fn open() -> Self {
        Self {
            connection: Some(ConnectionStatus::Open),
            ..Default::default()
        }
    }

    /// An update signalling the connection closed for `reason`.
    pub fn closed(reason: DisconnectReason) -> Self {
        Self {
            connection: Some(ConnectionStatus::Close),
            last_disconnect: Some(LastDisconnect {
                status_code: Some(reason.code()),
                message: None,
            }),
            ..Default::default()
        }
    }

    pub fn is_open(&self) -> bool {
        self.connection == Some(ConnectionStatus::Open)
    }

    pub fn is_closed(&self) -> bool {
        self.connection == Some(ConnectionStatus::Close)
    }

    /// Close reason carried by this update, if any.
    ///
    /// A close without a status code is reported as `ConnectionClosed`.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        if !self.is_closed() {
            return None;
        }
        let code = self
            .last_disconnect
            .as_ref()
            .and_then(|d| d.status_code)
            .unwrap_or(DisconnectReason::ConnectionClosed.code());
        Some(DisconnectReason::from_code(code))
    }
}

// ============================================================================
// Disconnect Reasons
// ============================================================================

/// Close reasons reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    LoggedOut,
    BadSession,
    RestartRequired,
    MultideviceMismatch,
    Forbidden,
    UnavailableService,
    Unknown(u16),
}

impl DisconnectReason {
    pub fn from_code(code: u16) -> Self {
        match code {
            428 => Self::ConnectionClosed,
            408 => Self::ConnectionLost,
            440 => Self::ConnectionReplaced,
            401 => Self::LoggedOut,
            500 => Self::BadSession,
            515 => Self::RestartRequired,
            411 => Self::MultideviceMismatch,
            403 => Self::Forbidden,
            503 => Self::UnavailableService,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::ConnectionClosed => 428,
            Self::ConnectionLost => 408,
            Self::ConnectionReplaced => 440,
            Self::LoggedOut => 401,
            Self::BadSession => 500,
            Self::RestartRequired => 515,
            Self::MultideviceMismatch => 411,
            Self::Forbidden => 403,
            Self::UnavailableService => 503,
            Self::Unknown(code) => code,
        }
    }

    /// The transport asks the session to resume on a fresh connection.
    pub fn is_restart_required(self) -> bool {
        self == Self::RestartRequired
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Raw result of a send, as returned by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    /// Transport-assigned message id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Initial delivery status code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
}

impl SendResult {
    pub fn new(message_id: impl Into<String>, status: i32) -> Self {
        Self {
            message_id: Some(message_id.into()),
            status: Some(status),
        }
    }
}

/// Delivery status change reported for a previously sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStatusUpdate {
    pub message_id: String,
    pub status: i32,
}

// ============================================================================
// Events
// ============================================================================

/// Events pushed by a live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Authentication material changed and should be persisted.
    CredsUpdate(Credentials),
    /// Connection state changed.
    ConnectionUpdate(ConnectionUpdate),
    /// Delivery status changed for one or more sent messages.
    MessagesUpdate(Vec<MessageStatusUpdate>),
}

// ============================================================================
// Connection
// ============================================================================

/// Options passed to the factory for every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// How long a pairing code stays valid.
    pub qr_timeout: Duration,
    /// Whether the transport should render pairing codes on its terminal.
    pub print_qr: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            qr_timeout: Duration::from_secs(20),
            print_qr: true,
        }
    }
}

/// Errors reported by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("failed to send message: {0}")]
    Send(String),

    #[error("failed to log out: {0}")]
    Logout(String),

    #[error("connection closed")]
    Closed,
}

/// A live connection to the transport.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send a text message. `Ok(None)` means the transport accepted the call
    /// but produced no message.
    async fn send_message(
        &self,
        to: &str,
        content: &str,
    ) -> Result<Option<SendResult>, TransportError>;

    /// Unlink the device. The transport reports a `LoggedOut` close afterwards.
    async fn logout(&self) -> Result<(), TransportError>;

    /// Identity the connection is authenticated as.
    fn identity(&self) -> Option<LinkedIdentity>;

    /// Platform of the authenticated device.
    fn platform(&self) -> Option<String>;

    /// Release the connection without logging out.
    async fn close(&self);
}

/// A freshly opened connection and the channel its events arrive on.
pub struct Established {
    pub connection: Arc<dyn Connection>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens connections for sessions.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(
        &self,
        session_id: &str,
        auth: AuthState,
        options: &ConnectOptions,
    ) -> Result<Established, TransportError>;
}
