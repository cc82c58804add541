//! Wire protocol for the chat relay.
//!
//! All traffic is JSON text frames over a persistent WebSocket, discriminated
//! by a `type` field. Signature and commitment material is opaque to the
//! relay: it is carried verbatim from sender to recipients and never
//! interpreted or validated here.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single chat message as it travels on the wire and sits in history.
///
/// `signature` is an arbitrary JSON value and `commitment` an opaque string;
/// both are produced and verified entirely by clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Unique within a scope. Client-supplied, or a server-generated UUIDv4.
    pub id: String,
    /// Display name of the sender.
    pub sender: String,
    /// Optional avatar URL, relayed as-is.
    #[serde(rename = "senderAvatar", skip_serializing_if = "Option::is_none")]
    pub sender_avatar: Option<String>,
    /// Message body.
    pub message: String,
    /// Opaque signature blob.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Value>,
    /// Opaque public-key commitment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commitment: Option<String>,
    /// RFC 3339 timestamp. Server-stamped when the client omits it.
    pub timestamp: String,
}

/// Frames accepted from clients.
///
/// Unrecognized `type` values land in [`ClientFrame::Unknown`] so that a
/// client speaking a newer protocol revision is ignored rather than
/// disconnected.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Room-mode admission (and, once active, rename).
    Join {
        sender: String,
        #[serde(default)]
        commitment: Option<String>,
    },
    /// A chat message. Most fields are optional on input; the session stamps
    /// defaults before the message is stored or relayed.
    Message {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        sender: Option<String>,
        #[serde(default, rename = "senderAvatar")]
        sender_avatar: Option<String>,
        message: String,
        #[serde(default)]
        signature: Option<Value>,
        #[serde(default)]
        commitment: Option<String>,
        #[serde(default)]
        timestamp: Option<String>,
    },
    /// Explicit departure.
    Leave {
        #[serde(default)]
        #[allow(dead_code)] // identity comes from the connection, not the frame
        sender: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Frames sent to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Join/leave notices and the welcome banner.
    System { message: String, timestamp: String },
    /// Recent-history replay, oldest first. Sent once on admission.
    History { messages: Vec<ChatMessage> },
    /// Online roster, pushed to a newly admitted room-mode connection.
    Users { users: Vec<String> },
    /// A relayed chat message.
    Message(ChatMessage),
}

impl ServerFrame {
    /// Build a `system` frame stamped with the current time.
    pub fn system(message: impl Into<String>) -> Self {
        Self::System {
            message: message.into(),
            timestamp: now_rfc3339(),
        }
    }
}

/// Current time as an RFC 3339 string, the canonical timestamp format
/// everywhere in the protocol.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
