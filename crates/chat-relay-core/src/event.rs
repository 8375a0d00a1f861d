//! Provider events and channel events.

use serde::{Deserialize, Serialize};

use crate::MessageRecord;

/// Message received from the messaging network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Raw provider sender address.
    pub from: String,
    /// Message text.
    pub body: String,
}

/// Event emitted by a provider connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A new pairing payload was issued.
    Qr(String),
    /// Pairing succeeded or stored credentials were accepted.
    Authenticated,
    /// The connection can send and receive.
    Ready,
    /// The connection is gone.
    Disconnected { reason: String },
    /// Inbound content.
    Message(InboundMessage),
}

/// Discriminant of a [`ClientEvent`], used as the transition table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTag {
    Qr,
    Authenticated,
    Ready,
    Disconnected,
    Message,
}

impl ClientEvent {
    /// Tag of this event.
    #[must_use]
    pub const fn tag(&self) -> EventTag {
        match self {
            Self::Qr(_) => EventTag::Qr,
            Self::Authenticated => EventTag::Authenticated,
            Self::Ready => EventTag::Ready,
            Self::Disconnected { .. } => EventTag::Disconnected,
            Self::Message(_) => EventTag::Message,
        }
    }
}

/// Event delivered to channel subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// Raw pairing payload (rendering is left to the transport).
    Qr { qr: String },
    Authenticated,
    Ready,
    Disconnected { reason: String },
    Message { record: MessageRecord },
    /// Background failure contained to this session.
    Error { message: String },
}

impl ChannelEvent {
    /// Short event name, as pushed to real-time clients.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Qr { .. } => "qr",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Disconnected { .. } => "disconnected",
            Self::Message { .. } => "message",
            Self::Error { .. } => "error",
        }
    }
}
