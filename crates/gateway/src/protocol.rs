//! Room wire protocol — JSON text frames tagged by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client → server.
///
/// Closing the socket is the `disconnect` event; it has no frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom {
        room_id: String,
        display_name: String,
    },
    ChatMessage {
        content: String,
    },
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent to every member, the new one included
    UserJoined {
        display_name: String,
        member_count: usize,
    },

    /// Sent to the members that remain
    UserDisconnected {
        display_name: String,
        member_count: usize,
    },

    /// Sent to a rejected joiner only
    RoomFull { room_id: String },

    ChatMessage {
        display_name: String,
        content: String,
        timestamp: DateTime<Utc>,
    },

    LlmStart,

    LlmEnd { content: String },

    LlmError { kind: String, message: String },

    /// Rejected input; sent to the requester only
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
