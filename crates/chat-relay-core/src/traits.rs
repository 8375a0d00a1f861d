//! Core traits for providers and storage.

use std::{
    fmt,
    str::FromStr,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{AuthContext, ClientEvent};

/// Rejected session identifier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidSessionId {
    #[error("Session id is empty")]
    Empty,
    #[error("Session id contains invalid character {0:?}")]
    InvalidChar(char),
    #[error("Session id may not start with '.'")]
    LeadingDot,
}

/// Session identifier.
///
/// Shared as registry key, provider connection name, credential key and
/// channel name, so it is restricted to characters that are safe as a file
/// name and a URL path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Parse and validate a session id.
    ///
    /// # Errors
    /// Returns error if the id is empty or contains unsupported characters.
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidSessionId> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(InvalidSessionId::Empty);
        }
        if raw.starts_with('.') {
            return Err(InvalidSessionId::LeadingDot);
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(InvalidSessionId::InvalidChar(c));
        }
        Ok(Self(raw))
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = InvalidSessionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = InvalidSessionId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Current time as Unix epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Persisted message row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Session the message was sent or received on.
    pub session_id: SessionId,
    /// Normalized sender.
    pub from: String,
    /// Recipient.
    pub to: String,
    /// Message text.
    pub body: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
}

impl MessageRecord {
    /// Create a record stamped with the current time.
    #[must_use]
    pub fn now(
        session_id: SessionId,
        from: impl Into<String>,
        to: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            from: from.into(),
            to: to.into(),
            body: body.into(),
            timestamp: now_millis(),
        }
    }
}

/// History filter for queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryFilter {
    /// Only records at or after this timestamp.
    pub since: Option<i64>,
    /// Limit results.
    pub limit: Option<usize>,
}

/// Storage error.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Append-only message history.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append one record.
    async fn append(&self, record: &MessageRecord) -> Result<(), StorageError>;

    /// Records for one session, newest first.
    async fn query(
        &self,
        session_id: &SessionId,
        filter: HistoryFilter,
    ) -> Result<Vec<MessageRecord>, StorageError>;
}

/// Auth material persistence, keyed by session id.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the stored blob, if any.
    async fn load(&self, session_id: &SessionId) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace the stored blob.
    async fn save(&self, session_id: &SessionId, blob: &[u8]) -> Result<(), StorageError>;

    /// Delete the stored blob. Deleting a missing blob is not an error.
    async fn delete(&self, session_id: &SessionId) -> Result<(), StorageError>;
}

/// Provider error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("Initialize failed: {0}")]
    Initialize(String),
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Teardown failed: {0}")]
    Teardown(String),
    #[error("Connection closed")]
    Closed,
}

/// Provider acknowledgement for an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    /// Provider-issued message id.
    pub id: String,
}

/// One open connection to the messaging network.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Send a text message to a chat address.
    async fn send_message(&self, chat_address: &str, body: &str)
    -> Result<SentMessage, ClientError>;

    /// Unlink the device from the account.
    async fn logout(&self) -> Result<(), ClientError>;

    /// Release the connection.
    async fn destroy(&self) -> Result<(), ClientError>;
}

/// Opens provider connections.
///
/// Lifecycle and content events for the connection are pushed into `events`
/// for as long as the connection lives. Dropping the sender signals that the
/// connection is gone.
#[async_trait]
pub trait ClientConnector: Send + Sync {
    /// Open a connection for `ctx.session_id`.
    async fn initialize(
        &self,
        ctx: AuthContext,
        events: mpsc::Sender<ClientEvent>,
    ) -> Result<Arc<dyn MessagingClient>, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_validation() {
        assert!(SessionId::parse("tenant-1_a.b").is_ok());
        assert_eq!(SessionId::parse(""), Err(InvalidSessionId::Empty));
        assert_eq!(SessionId::parse(".hidden"), Err(InvalidSessionId::LeadingDot));
        assert_eq!(
            SessionId::parse("a/b"),
            Err(InvalidSessionId::InvalidChar('/'))
        );
    }

    #[test]
    fn test_session_id_serde_is_transparent() {
        let id = SessionId::parse("alpha").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alpha\"");

        let parsed: SessionId = serde_json::from_str("\"alpha\"").unwrap();
        assert_eq!(parsed, id);
        assert!(serde_json::from_str::<SessionId>("\"a b\"").is_err());
    }

    #[test]
    fn test_record_is_stamped() {
        let before = now_millis();
        let record = MessageRecord::now(SessionId::parse("s").unwrap(), "admin", "123", "hi");
        assert!(record.timestamp >= before);
        assert_eq!(record.from, "admin");
    }
}
