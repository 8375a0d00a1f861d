//! Directory-backed credential storage.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chat_relay_core::{CredentialStore, SessionId, StorageError};

const EXTENSION: &str = "cred";

/// One file per session under a directory.
///
/// Session ids are validated on parse, so they are used as file names
/// directly. Writes go to a temporary file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    /// Open a store rooted at `dir`, creating it if needed.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::Internal(format!("{}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    /// Root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &SessionId) -> PathBuf {
        self.dir.join(format!("{session_id}.{EXTENSION}"))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, session_id: &SessionId) -> Result<Option<Vec<u8>>, StorageError> {
        match tokio::fs::read(self.path_for(session_id)).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Internal(e.to_string())),
        }
    }

    async fn save(&self, session_id: &SessionId, blob: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(session_id);
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));

        tokio::fs::write(&tmp, blob)
            .await
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::Internal(e.to_string()))
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(session_id)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(StorageError::Internal(e.to_string())),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path().join("creds")).await.unwrap();
        let id = SessionId::parse("tenant-7").unwrap();

        assert_eq!(store.load(&id).await.unwrap(), None);

        store.save(&id, b"v1").await.unwrap();
        store.save(&id, b"v2").await.unwrap();
        assert_eq!(store.load(&id).await.unwrap().as_deref(), Some(&b"v2"[..]));
        assert!(store.dir().join("tenant-7.cred").exists());

        store.delete(&id).await.unwrap();
        assert_eq!(store.load(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path()).await.unwrap();
        let id = SessionId::parse("never-saved").unwrap();
        tokio_test::assert_ok!(store.delete(&id).await);
    }
}
