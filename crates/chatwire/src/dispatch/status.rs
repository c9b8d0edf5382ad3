//! Delivery status of outbound messages and the transport code table.

use serde::{Deserialize, Serialize};

/// Delivery status of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Error,
    Pending,
    ServerAck,
    DeliveryAck,
    Read,
    Played,
}

impl MessageStatus {
    /// Map a transport status code. Unknown codes map to `Error`.
    pub fn from_transport(code: i32) -> Self {
        match code {
            1 => Self::Pending,
            2 => Self::ServerAck,
            3 => Self::DeliveryAck,
            4 => Self::Read,
            5 => Self::Played,
            _ => Self::Error,
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Error => "error",
            Self::Pending => "pending",
            Self::ServerAck => "server_ack",
            Self::DeliveryAck => "delivery_ack",
            Self::Read => "read",
            Self::Played => "played",
        };
        f.write_str(s)
    }
}
