//! SQLite message history (feature-gated).

use std::str::FromStr;

use async_trait::async_trait;
use chat_relay_core::{HistoryFilter, MessageRecord, MessageStore, SessionId, StorageError};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    session_id TEXT NOT NULL,
    sender     TEXT NOT NULL,
    recipient  TEXT NOT NULL,
    body       TEXT NOT NULL,
    timestamp  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_session_time ON messages (session_id, timestamp DESC);
";

fn internal(e: impl std::fmt::Display) -> StorageError {
    StorageError::Internal(e.to_string())
}

/// SQLite storage implementation.
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    /// Connect and create the schema if missing.
    ///
    /// In-memory databases are limited to one connection so every query sees
    /// the same database.
    ///
    /// # Errors
    /// Returns error if database connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(internal)?
            .create_if_missing(true);
        let max_connections = if database_url.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(internal)?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await.map_err(internal)?;

        tracing::info!(database_url, "sqlite message store ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(&self, record: &MessageRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO messages (session_id, sender, recipient, body, timestamp)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.session_id.as_str())
        .bind(&record.from)
        .bind(&record.to)
        .bind(&record.body)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await
        .map_err(internal)?;

        Ok(())
    }

    async fn query(
        &self,
        session_id: &SessionId,
        filter: HistoryFilter,
    ) -> Result<Vec<MessageRecord>, StorageError> {
        // SQLite treats a negative LIMIT as no limit.
        let limit = filter
            .limit
            .map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));

        let rows: Vec<(String, String, String, i64)> = sqlx::query_as(
            "SELECT sender, recipient, body, timestamp FROM messages
             WHERE session_id = ? AND timestamp >= ?
             ORDER BY timestamp DESC, rowid DESC
             LIMIT ?",
        )
        .bind(session_id.as_str())
        .bind(filter.since.unwrap_or(i64::MIN))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;

        Ok(rows
            .into_iter()
            .map(|(from, to, body, timestamp)| MessageRecord {
                session_id: session_id.clone(),
                from,
                to,
                body,
                timestamp,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session: &str, body: &str, timestamp: i64) -> MessageRecord {
        MessageRecord {
            session_id: SessionId::parse(session).unwrap(),
            from: "admin".to_string(),
            to: "15550001".to_string(),
            body: body.to_string(),
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_history_is_scoped_and_ordered() {
        let store = SqliteMessageStore::connect("sqlite::memory:").await.unwrap();
        store.append(&record("a", "old", 1)).await.unwrap();
        store.append(&record("b", "elsewhere", 2)).await.unwrap();
        store.append(&record("a", "new", 3)).await.unwrap();

        let id = SessionId::parse("a").unwrap();
        let history = store.query(&id, HistoryFilter::default()).await.unwrap();
        let bodies: Vec<&str> = history.iter().map(|r| r.body.as_str()).collect();
        assert_eq!(bodies, ["new", "old"]);
        assert!(history.iter().all(|r| r.session_id == id));
    }

    #[tokio::test]
    async fn test_limit_and_since() {
        let store = SqliteMessageStore::connect("sqlite::memory:").await.unwrap();
        for ts in 1..=5 {
            store.append(&record("a", &ts.to_string(), ts)).await.unwrap();
        }

        let id = SessionId::parse("a").unwrap();
        let filter = HistoryFilter {
            since: Some(2),
            limit: Some(3),
        };
        let stamps: Vec<i64> = store
            .query(&id, filter)
            .await
            .unwrap()
            .iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(stamps, [5, 4, 3]);
    }
}
