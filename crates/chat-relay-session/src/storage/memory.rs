//! In-memory message and credential storage.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use chat_relay_core::{
    CredentialStore, HistoryFilter, MessageRecord, MessageStore, SessionId, StorageError,
};

/// In-memory message history.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
pub struct MemoryMessageStore {
    records: RwLock<HashMap<SessionId, Vec<MessageRecord>>>,
}

impl MemoryMessageStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, record: &MessageRecord) -> Result<(), StorageError> {
        self.records
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .entry(record.session_id.clone())
            .or_default()
            .push(record.clone());

        Ok(())
    }

    async fn query(
        &self,
        session_id: &SessionId,
        filter: HistoryFilter,
    ) -> Result<Vec<MessageRecord>, StorageError> {
        let records = self
            .records
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        // Newest first; later appends win ties.
        let mut result: Vec<MessageRecord> = records
            .get(session_id)
            .map(|rs| {
                rs.iter()
                    .rev()
                    .filter(|r| filter.since.is_none_or(|since| r.timestamp >= since))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        result.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }

        Ok(result)
    }
}

/// In-memory credential storage.
pub struct MemoryCredentialStore {
    blobs: RwLock<HashMap<SessionId, Vec<u8>>>,
}

impl MemoryCredentialStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, session_id: &SessionId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .blobs
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(session_id)
            .cloned())
    }

    async fn save(&self, session_id: &SessionId, blob: &[u8]) -> Result<(), StorageError> {
        self.blobs
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .insert(session_id.clone(), blob.to_vec());

        Ok(())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), StorageError> {
        self.blobs
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .remove(session_id);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session: &str, body: &str, timestamp: i64) -> MessageRecord {
        MessageRecord {
            session_id: SessionId::parse(session).unwrap(),
            from: "15550001".to_string(),
            to: session.to_string(),
            body: body.to_string(),
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_query_is_scoped_and_newest_first() {
        let store = MemoryMessageStore::new();
        store.append(&record("a", "first", 10)).await.unwrap();
        store.append(&record("b", "other", 15)).await.unwrap();
        store.append(&record("a", "third", 30)).await.unwrap();
        store.append(&record("a", "second", 20)).await.unwrap();

        let id = SessionId::parse("a").unwrap();
        let bodies: Vec<String> = store
            .query(&id, HistoryFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.body)
            .collect();
        assert_eq!(bodies, ["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_query_filter() {
        let store = MemoryMessageStore::new();
        for (n, ts) in [10, 20, 30, 40].into_iter().enumerate() {
            store.append(&record("a", &n.to_string(), ts)).await.unwrap();
        }

        let id = SessionId::parse("a").unwrap();
        let filter = HistoryFilter {
            since: Some(20),
            limit: Some(2),
        };
        let stamps: Vec<i64> = store
            .query(&id, filter)
            .await
            .unwrap()
            .iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(stamps, [40, 30]);
    }

    #[tokio::test]
    async fn test_unknown_session_has_empty_history() {
        let store = MemoryMessageStore::new();
        let id = SessionId::parse("nobody").unwrap();
        tokio_test::assert_ok!(store.query(&id, HistoryFilter::default()).await);
    }

    #[tokio::test]
    async fn test_credentials_roundtrip_and_delete() {
        let store = MemoryCredentialStore::new();
        let id = SessionId::parse("a").unwrap();

        assert_eq!(store.load(&id).await.unwrap(), None);
        store.save(&id, b"blob").await.unwrap();
        assert_eq!(store.load(&id).await.unwrap().as_deref(), Some(&b"blob"[..]));

        store.delete(&id).await.unwrap();
        store.delete(&id).await.unwrap();
        assert_eq!(store.load(&id).await.unwrap(), None);
    }
}
