//! Scripted provider for tests.
//!
//! `ScriptedConnector` records every call the relay makes and lets a test
//! push provider events for a session by hand.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    AuthContext, ClientConnector, ClientError, ClientEvent, InboundMessage, MessagingClient,
    SentMessage, SessionId,
};

/// One recorded outbound send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub session_id: SessionId,
    pub chat_address: String,
    pub body: String,
    pub message_id: String,
}

#[derive(Default)]
struct Script {
    attempts: HashMap<SessionId, usize>,
    contexts: HashMap<SessionId, AuthContext>,
    /// Open connection per session, tagged with its connection number.
    events: HashMap<SessionId, (u64, mpsc::Sender<ClientEvent>)>,
    connections: u64,
    failing_sends: HashSet<SessionId>,
    failing_inits: HashSet<SessionId>,
    sent: Vec<SentRecord>,
    logouts: HashMap<SessionId, usize>,
    destroys: HashMap<SessionId, usize>,
}

/// Connector whose connections are driven by the test.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
    init_delay: Duration,
    logout_delay: Duration,
    restore: bool,
}

impl ScriptedConnector {
    /// Create a connector that succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every initialize call, widening race windows in tests.
    #[must_use]
    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    /// Delay every logout call, keeping teardown in flight.
    #[must_use]
    pub fn with_logout_delay(mut self, delay: Duration) -> Self {
        self.logout_delay = delay;
        self
    }

    /// Emit `authenticated` + `ready` on initialize when credentials exist.
    #[must_use]
    pub fn with_credential_restore(mut self) -> Self {
        self.restore = true;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every send on `session_id` fail.
    pub fn fail_sends(&self, session_id: &SessionId) {
        self.lock().failing_sends.insert(session_id.clone());
    }

    /// Make initialize fail for `session_id`.
    pub fn fail_initialize(&self, session_id: &SessionId) {
        self.lock().failing_inits.insert(session_id.clone());
    }

    /// Number of initialize calls seen for `session_id`.
    #[must_use]
    pub fn initialize_count(&self, session_id: &SessionId) -> usize {
        self.lock().attempts.get(session_id).copied().unwrap_or(0)
    }

    /// Sends recorded so far, in call order.
    #[must_use]
    pub fn sent(&self) -> Vec<SentRecord> {
        self.lock().sent.clone()
    }

    /// Number of sends attempted on `session_id`, failed ones included.
    #[must_use]
    pub fn send_count(&self, session_id: &SessionId) -> usize {
        self.lock()
            .sent
            .iter()
            .filter(|s| &s.session_id == session_id)
            .count()
    }

    #[must_use]
    pub fn logout_count(&self, session_id: &SessionId) -> usize {
        self.lock().logouts.get(session_id).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn destroy_count(&self, session_id: &SessionId) -> usize {
        self.lock().destroys.get(session_id).copied().unwrap_or(0)
    }

    /// Push a provider event for `session_id`.
    ///
    /// Returns false if the session has no open connection.
    pub async fn emit(&self, session_id: &SessionId, event: ClientEvent) -> bool {
        let sender = self
            .lock()
            .events
            .get(session_id)
            .map(|(_, tx)| tx.clone());
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Push an inbound message.
    pub async fn receive(&self, session_id: &SessionId, from: &str, body: &str) -> bool {
        self.emit(
            session_id,
            ClientEvent::Message(InboundMessage {
                from: from.to_string(),
                body: body.to_string(),
            }),
        )
        .await
    }

    /// Complete pairing: persist credentials, then `authenticated` and `ready`.
    pub async fn pair(&self, session_id: &SessionId) -> bool {
        let ctx = self.lock().contexts.get(session_id).cloned();
        if let Some(ctx) = ctx {
            let _ = ctx.save_credentials(b"scripted-credentials").await;
        }
        self.emit(session_id, ClientEvent::Authenticated).await
            && self.emit(session_id, ClientEvent::Ready).await
    }

    /// Drop the event sender, as a provider does when its connection dies.
    pub fn close(&self, session_id: &SessionId) {
        self.lock().events.remove(session_id);
    }
}

#[async_trait]
impl ClientConnector for ScriptedConnector {
    async fn initialize(
        &self,
        ctx: AuthContext,
        events: mpsc::Sender<ClientEvent>,
    ) -> Result<Arc<dyn MessagingClient>, ClientError> {
        let session_id = ctx.session_id.clone();
        *self.lock().attempts.entry(session_id.clone()).or_default() += 1;

        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }

        if self.lock().failing_inits.contains(&session_id) {
            return Err(ClientError::Initialize(format!(
                "scripted failure for {session_id}"
            )));
        }

        let restored = if self.restore {
            ctx.load_credentials()
                .await
                .map_err(|e| ClientError::Initialize(e.to_string()))?
                .is_some()
        } else {
            false
        };

        let connection = {
            let mut script = self.lock();
            script.connections += 1;
            let connection = script.connections;
            script.contexts.insert(session_id.clone(), ctx);
            script
                .events
                .insert(session_id.clone(), (connection, events.clone()));
            connection
        };

        if restored {
            let _ = events.send(ClientEvent::Authenticated).await;
            let _ = events.send(ClientEvent::Ready).await;
        }

        Ok(Arc::new(ScriptedClient {
            session_id,
            connection,
            logout_delay: self.logout_delay,
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedClient {
    session_id: SessionId,
    connection: u64,
    logout_delay: Duration,
    script: Arc<Mutex<Script>>,
}

impl ScriptedClient {
    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessagingClient for ScriptedClient {
    async fn send_message(
        &self,
        chat_address: &str,
        body: &str,
    ) -> Result<SentMessage, ClientError> {
        let mut script = self.lock();
        let message_id = Uuid::new_v4().to_string();
        script.sent.push(SentRecord {
            session_id: self.session_id.clone(),
            chat_address: chat_address.to_string(),
            body: body.to_string(),
            message_id: message_id.clone(),
        });

        if script.failing_sends.contains(&self.session_id) {
            return Err(ClientError::Send("scripted send failure".to_string()));
        }
        Ok(SentMessage { id: message_id })
    }

    async fn logout(&self) -> Result<(), ClientError> {
        if !self.logout_delay.is_zero() {
            tokio::time::sleep(self.logout_delay).await;
        }
        *self
            .lock()
            .logouts
            .entry(self.session_id.clone())
            .or_default() += 1;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), ClientError> {
        let mut script = self.lock();
        *script.destroys.entry(self.session_id.clone()).or_default() += 1;
        // A later connection for the same id may already be open.
        if script
            .events
            .get(&self.session_id)
            .is_some_and(|(connection, _)| *connection == self.connection)
        {
            script.events.remove(&self.session_id);
        }
        Ok(())
    }
}
