//! Authentication context handed to provider connections.

use std::{fmt, sync::Arc};

use crate::{CredentialStore, SessionId, StorageError};

/// What a provider connection is initialized with.
///
/// The relay only supplies the session id; the credential store is reached
/// through this context so providers can restore and persist auth material
/// under that key without the relay touching it.
#[derive(Clone)]
pub struct AuthContext {
    /// Key for the connection and its credentials.
    pub session_id: SessionId,

    credentials: Arc<dyn CredentialStore>,
}

impl AuthContext {
    /// Create a context for one session.
    #[must_use]
    pub fn new(session_id: SessionId, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            session_id,
            credentials,
        }
    }

    /// Load stored auth material for this session.
    ///
    /// # Errors
    /// Returns error if the credential store fails.
    pub async fn load_credentials(&self) -> Result<Option<Vec<u8>>, StorageError> {
        self.credentials.load(&self.session_id).await
    }

    /// Persist auth material for this session.
    ///
    /// # Errors
    /// Returns error if the credential store fails.
    pub async fn save_credentials(&self, blob: &[u8]) -> Result<(), StorageError> {
        self.credentials.save(&self.session_id, blob).await
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
