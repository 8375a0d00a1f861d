//! Wire protocol for real-time clients.

use chat_relay_core::{ChannelEvent, MessageRecord, SessionId};
use serde::{Deserialize, Serialize};

use crate::qr;

/// Message from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a session's channel, creating the session if needed.
    Join { session_id: SessionId },
    /// Leave a session's channel.
    Leave { session_id: SessionId },
    /// Ping for keepalive.
    Ping,
}

/// Message from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Channel joined.
    Joined { session_id: SessionId },
    /// Channel left.
    Left { session_id: SessionId },
    /// Pairing QR as an image data URL.
    Qr { session_id: SessionId, qr: String },
    Authenticated { session_id: SessionId },
    Ready { session_id: SessionId },
    Disconnected { session_id: SessionId, reason: String },
    Message {
        session_id: SessionId,
        #[serde(flatten)]
        record: MessageRecord,
    },
    /// Error message.
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        message: String,
    },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Translate a channel event for the client, rendering QR payloads.
    #[must_use]
    pub fn from_channel(session_id: SessionId, event: ChannelEvent) -> Self {
        match event {
            ChannelEvent::Qr { qr: payload } => match qr::render_data_url(&payload) {
                Ok(qr) => Self::Qr { session_id, qr },
                Err(e) => Self::Error {
                    session_id: Some(session_id),
                    message: e.to_string(),
                },
            },
            ChannelEvent::Authenticated => Self::Authenticated { session_id },
            ChannelEvent::Ready => Self::Ready { session_id },
            ChannelEvent::Disconnected { reason } => Self::Disconnected { session_id, reason },
            ChannelEvent::Message { record } => Self::Message { session_id, record },
            ChannelEvent::Error { message } => Self::Error {
                session_id: Some(session_id),
                message,
            },
        }
    }

    /// Create an error not tied to a session.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            session_id: None,
            message: message.into(),
        }
    }
}
