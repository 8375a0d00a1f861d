//! Relay error taxonomy.

use chat_relay_core::{ClientError, InvalidSessionId, SessionId, StorageError};
use serde::{Deserialize, Serialize};

/// Relay error.
///
/// `Clone` so one failed initialization can be handed to every caller that
/// was waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Session not ready: {0}")]
    NotReady(SessionId),
    #[error("Provider error: {0}")]
    Provider(#[from] ClientError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),
    #[error("Session not found: {0}")]
    NotFound(SessionId),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Serializable error tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    NotReady,
    ProviderError,
    PersistenceError,
    NotFound,
    InvalidRequest,
}

impl RelayError {
    /// Tag for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::NotReady(_) => ErrorKind::NotReady,
            Self::Provider(_) => ErrorKind::ProviderError,
            Self::Persistence(_) => ErrorKind::PersistenceError,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }
}

impl From<InvalidSessionId> for RelayError {
    fn from(err: InvalidSessionId) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_snake_case() {
        let err = RelayError::Provider(ClientError::Send("boom".into()));
        assert_eq!(err.kind(), ErrorKind::ProviderError);
        assert_eq!(
            serde_json::to_string(&err.kind()).unwrap(),
            "\"provider_error\""
        );
    }

    #[test]
    fn test_invalid_id_is_invalid_request() {
        let err: RelayError = SessionId::parse("").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }
}
