//! Wire event vocabulary exchanged over a client channel.
//!
//! Two event families, both tagged JSON with camelCase fields:
//!
//! - **[`ClientEvent`]**: frames a client sends to the server — the
//!   handshake credential, explicit room joins, room-scoped messages,
//!   and the legacy all-connections broadcast.
//! - **[`ServerEvent`]**: frames the server pushes to a client — the
//!   post-handshake confirmation, routed messages, broadcast text, and
//!   per-message acknowledgements.
//!
//! The transport is deliberately not modelled here: any bidirectional
//! channel that can carry these frames as text works.

use serde::{Deserialize, Serialize};

use crate::ids::{RoomName, UserId};

/// Frames sent client → server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    /// First frame on any new channel: carries the credential token.
    #[serde(rename_all = "camelCase")]
    Handshake {
        /// Signed credential token. Absence is a verification failure.
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Explicit room join.
    #[serde(rename_all = "camelCase")]
    Join {
        /// Room to join. Created lazily if it does not exist.
        room_name: RoomName,
    },

    /// Room-scoped message send.
    #[serde(rename_all = "camelCase")]
    Message {
        /// Target room.
        room_name: RoomName,
        /// Message body.
        message: String,
        /// When present, the server acknowledges this send exactly once.
        #[serde(skip_serializing_if = "Option::is_none")]
        ack_id: Option<String>,
    },

    /// Legacy broadcast: delivered to every connection except the sender.
    Broadcast {
        /// Raw text payload.
        text: String,
    },
}

/// Frames pushed server → client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Sent once after a successful handshake.
    #[serde(rename_all = "camelCase")]
    Connected {
        /// The verified user ID for this connection.
        user_id: UserId,
    },

    /// A routed room message from another member.
    #[serde(rename_all = "camelCase")]
    Message {
        /// Sender's user ID.
        sender_id: UserId,
        /// Sender's display name.
        sender_name: String,
        /// Message body.
        message: String,
    },

    /// Legacy broadcast text.
    Broadcast {
        /// Raw text payload.
        text: String,
    },

    /// Acknowledgement for a message that carried an `ackId`.
    #[serde(rename_all = "camelCase")]
    Ack {
        /// Echoed acknowledgement ID from the client's message.
        ack_id: String,
        /// Outcome of the routed send.
        status: AckStatus,
    },
}

/// Outcome carried by an acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    /// Fanout completed.
    Ok,
    /// Routing failed before fanout could run.
    Error,
}
