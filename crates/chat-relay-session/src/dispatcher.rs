//! Outbound send, broadcast and history.

use std::sync::Arc;

use chat_relay_core::{HistoryFilter, MessageRecord, SessionId, address::chat_address};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{ErrorKind, RelayError, Session, SessionRegistry};

/// Outcome of a broadcast for one tracked session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub session_id: SessionId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl BroadcastResult {
    fn from_outcome(session_id: SessionId, outcome: Result<String, RelayError>) -> Self {
        match outcome {
            Ok(message_id) => Self {
                session_id,
                success: true,
                message_id: Some(message_id),
                error: None,
            },
            Err(e) => Self {
                session_id,
                success: false,
                message_id: None,
                error: Some(e.kind()),
            },
        }
    }
}

/// Sends messages through ready sessions and records them.
pub struct MessageDispatcher {
    registry: Arc<SessionRegistry>,
}

impl MessageDispatcher {
    /// Create a dispatcher over a registry.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Send `body` to `recipient` through session `id`.
    ///
    /// The outbound record is written before the provider message id is
    /// returned. A failed write is logged; the send still succeeds.
    ///
    /// # Errors
    /// - `InvalidRequest` for an empty recipient or body
    /// - `NotReady` if the session is absent or not `Ready`
    /// - `Provider` if the provider rejects the send
    #[instrument(skip_all, fields(session_id = %id))]
    pub async fn send(
        &self,
        id: &SessionId,
        recipient: &str,
        body: &str,
    ) -> Result<String, RelayError> {
        validate(recipient, body)?;
        let session = self
            .registry
            .get(id)
            .ok_or_else(|| RelayError::NotReady(id.clone()))?;
        self.send_on(&session, recipient, body).await
    }

    /// Send `body` to `recipient` through every tracked session.
    ///
    /// Attempts run concurrently; the result holds one entry per tracked
    /// session, in registry order, once every attempt has finished.
    ///
    /// # Errors
    /// Returns `InvalidRequest` for an empty recipient or body.
    #[instrument(skip_all)]
    pub async fn broadcast(
        &self,
        recipient: &str,
        body: &str,
    ) -> Result<Vec<BroadcastResult>, RelayError> {
        validate(recipient, body)?;
        let sessions = self.registry.sessions();

        let attempts = sessions.iter().map(|session| async move {
            let outcome = self.send_on(session, recipient, body).await;
            BroadcastResult::from_outcome(session.id().clone(), outcome)
        });
        let results = futures::future::join_all(attempts).await;

        let delivered = results.iter().filter(|r| r.success).count();
        tracing::info!(targets = results.len(), delivered, "broadcast finished");
        Ok(results)
    }

    /// History for `id`, newest first.
    ///
    /// # Errors
    /// Returns `Persistence` if the store fails.
    pub async fn history(
        &self,
        id: &SessionId,
        filter: HistoryFilter,
    ) -> Result<Vec<MessageRecord>, RelayError> {
        Ok(self.registry.messages().query(id, filter).await?)
    }

    async fn send_on(
        &self,
        session: &Session,
        recipient: &str,
        body: &str,
    ) -> Result<String, RelayError> {
        let client = session
            .ready_client()
            .ok_or_else(|| RelayError::NotReady(session.id().clone()))?;

        let recipient = recipient.trim();
        let sent = client.send_message(&chat_address(recipient), body).await?;

        let record = MessageRecord::now(
            session.id().clone(),
            self.registry.config().outbound_sender.as_str(),
            recipient,
            body,
        );
        if let Err(e) = self.registry.messages().append(&record).await {
            tracing::error!(
                session_id = %session.id(),
                message_id = %sent.id,
                error = %e,
                "failed to persist outbound message"
            );
        }

        tracing::debug!(session_id = %session.id(), message_id = %sent.id, "message sent");
        Ok(sent.id)
    }
}

fn validate(recipient: &str, body: &str) -> Result<(), RelayError> {
    if recipient.trim().is_empty() {
        return Err(RelayError::InvalidRequest("recipient is empty".to_string()));
    }
    if body.is_empty() {
        return Err(RelayError::InvalidRequest("body is empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chat_relay_core::testing::ScriptedConnector;

    use super::*;
    use crate::{
        RelayConfig, SessionState,
        storage::{MemoryCredentialStore, MemoryMessageStore},
    };

    fn id(s: &str) -> SessionId {
        SessionId::parse(s).unwrap()
    }

    fn dispatcher(connector: &ScriptedConnector) -> MessageDispatcher {
        MessageDispatcher::new(Arc::new(SessionRegistry::new(
            Arc::new(connector.clone()),
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(MemoryMessageStore::new()),
            RelayConfig::default(),
        )))
    }

    async fn ready(dispatcher: &MessageDispatcher, connector: &ScriptedConnector, name: &str) {
        let session = dispatcher.registry().get_or_create(&id(name)).await.unwrap();
        connector.pair(&id(name)).await;
        let mut rx = session.watch();
        tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|s| s.state == SessionState::Ready),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn test_send_records_outbound_as_admin() {
        let connector = ScriptedConnector::new();
        let dispatcher = dispatcher(&connector);
        ready(&dispatcher, &connector, "a").await;

        let message_id = dispatcher.send(&id("a"), "+1 555 0100", "hi").await.unwrap();

        let sent = connector.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_address, "15550100@c.us");
        assert_eq!(sent[0].message_id, message_id);

        let history = dispatcher
            .history(&id("a"), HistoryFilter::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from, "admin");
        assert_eq!(history[0].to, "+1 555 0100");
        assert_eq!(history[0].body, "hi");
    }

    #[tokio::test]
    async fn test_send_on_absent_or_unready_session_skips_provider() {
        let connector = ScriptedConnector::new();
        let dispatcher = dispatcher(&connector);

        let absent = dispatcher.send(&id("ghost"), "1", "hi").await;
        assert!(matches!(absent, Err(RelayError::NotReady(_))));

        dispatcher.registry().get_or_create(&id("a")).await.unwrap();
        let unready = dispatcher.send(&id("a"), "1", "hi").await;
        assert!(matches!(unready, Err(RelayError::NotReady(_))));

        assert!(connector.sent().is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_persists_nothing() {
        let connector = ScriptedConnector::new();
        let dispatcher = dispatcher(&connector);
        ready(&dispatcher, &connector, "a").await;
        connector.fail_sends(&id("a"));

        let result = dispatcher.send(&id("a"), "1", "hi").await;
        assert!(matches!(result, Err(RelayError::Provider(_))));

        let history = dispatcher
            .history(&id("a"), HistoryFilter::default())
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_empty_body_is_rejected() {
        let connector = ScriptedConnector::new();
        let dispatcher = dispatcher(&connector);
        ready(&dispatcher, &connector, "a").await;

        let result = dispatcher.send(&id("a"), "1", "").await;
        assert!(matches!(result, Err(RelayError::InvalidRequest(_))));
        assert!(matches!(
            dispatcher.broadcast(" ", "hi").await,
            Err(RelayError::InvalidRequest(_))
        ));
        assert!(connector.sent().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_with_no_sessions() {
        let connector = ScriptedConnector::new();
        let dispatcher = dispatcher(&connector);
        let results = dispatcher.broadcast("1", "hi").await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_broadcast_result_serialization() {
        let ok = BroadcastResult::from_outcome(id("a"), Ok("m1".into()));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({"session_id": "a", "success": true, "message_id": "m1"})
        );

        let failed = BroadcastResult::from_outcome(id("b"), Err(RelayError::NotReady(id("b"))));
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({"session_id": "b", "success": false, "error": "not_ready"})
        );
    }
}
