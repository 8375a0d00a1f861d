//! Session registry: single-flight creation and scoped teardown.

use std::{
    collections::HashMap,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use chat_relay_core::{
    AuthContext, ClientConnector, ClientError, CredentialStore, EventRouter, MessageStore,
    SessionId, Subscription,
};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::instrument;

use crate::{RelayConfig, RelayError, Session, SessionState, driver, session::Teardown};

type InitFuture = Shared<BoxFuture<'static, Result<(), RelayError>>>;

/// Tracked entry.
struct Slot {
    seq: u64,
    session: Arc<Session>,
    init: InitFuture,
}

type Slots = Arc<RwLock<HashMap<SessionId, Slot>>>;

/// Row of [`SessionRegistry::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub state: SessionState,
    pub has_qr: bool,
}

/// Owns every live session, keyed by id.
///
/// Creation of an absent id is single-flight: concurrent callers share one
/// initialization future, so the connector is asked for at most one
/// connection per id. Reads take a short sync lock and never await.
pub struct SessionRegistry {
    connector: Arc<dyn ClientConnector>,
    credentials: Arc<dyn CredentialStore>,
    messages: Arc<dyn MessageStore>,
    router: Arc<EventRouter>,
    config: RelayConfig,
    slots: Slots,
    next_seq: AtomicU64,
}

impl SessionRegistry {
    /// Create a registry over the given provider and stores.
    #[must_use]
    pub fn new(
        connector: Arc<dyn ClientConnector>,
        credentials: Arc<dyn CredentialStore>,
        messages: Arc<dyn MessageStore>,
        config: RelayConfig,
    ) -> Self {
        let router = Arc::new(EventRouter::with_capacity(config.channel_capacity));
        Self {
            connector,
            credentials,
            messages,
            router,
            config,
            slots: Arc::new(RwLock::new(HashMap::new())),
            next_seq: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    #[must_use]
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    #[must_use]
    pub fn messages(&self) -> &Arc<dyn MessageStore> {
        &self.messages
    }

    /// Get a tracked session, terminated ones included.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|slot| Arc::clone(&slot.session))
    }

    fn slot(&self, id: &SessionId) -> Option<(Arc<Session>, InitFuture)> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|slot| (Arc::clone(&slot.session), slot.init.clone()))
    }

    /// Get or create the session for `id` and wait for its connection to open.
    ///
    /// A terminated entry is replaced by a fresh session.
    ///
    /// # Errors
    /// Returns `Provider` if the connection could not be opened; every caller
    /// waiting on the same attempt gets the same error.
    #[instrument(skip_all, fields(session_id = %id))]
    pub async fn get_or_create(&self, id: &SessionId) -> Result<Arc<Session>, RelayError> {
        let (session, init) = self.ensure(id);
        init.await?;
        Ok(session)
    }

    /// Join the channel for `id`, creating the session if absent.
    ///
    /// Does not wait for the connection; the replay reflects whatever state
    /// the session is in at join time.
    #[must_use]
    pub fn subscribe(&self, id: &SessionId) -> Subscription {
        let (session, _) = self.ensure(id);
        session.subscribe()
    }

    /// Ordered `(id, state, has_qr)` snapshot of every tracked session.
    #[must_use]
    pub fn list(&self) -> Vec<SessionSummary> {
        self.sessions()
            .iter()
            .map(|session| {
                let snap = session.snapshot();
                SessionSummary {
                    id: snap.id,
                    state: snap.state,
                    has_qr: snap.qr.is_some(),
                }
            })
            .collect()
    }

    /// Tracked sessions in insertion order.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let mut ordered: Vec<(u64, Arc<Session>)> = slots
            .values()
            .map(|slot| (slot.seq, Arc::clone(&slot.session)))
            .collect();
        drop(slots);

        ordered.sort_by_key(|(seq, _)| *seq);
        ordered.into_iter().map(|(_, session)| session).collect()
    }

    /// Log out and forget `id`.
    ///
    /// Idempotent. Returns whether a session was tracked.
    #[instrument(skip_all, fields(session_id = %id))]
    pub async fn remove(&self, id: &SessionId) -> bool {
        let Some((session, init)) = self.slot(id) else {
            return false;
        };

        session.shut_down(Teardown::Logout, "logged out").await;
        // A connection still opening is closed by its own init task.
        let _ = init.await;
        evict(&self.slots, id, &session);
        true
    }

    /// Log out a tracked session.
    ///
    /// # Errors
    /// Returns `NotFound` if `id` is not tracked.
    pub async fn logout(&self, id: &SessionId) -> Result<(), RelayError> {
        if self.remove(id).await {
            Ok(())
        } else {
            Err(RelayError::NotFound(id.clone()))
        }
    }

    /// Remove `id` and delete its stored credentials.
    ///
    /// # Errors
    /// Returns `Persistence` if the credential store fails.
    pub async fn delete(&self, id: &SessionId) -> Result<(), RelayError> {
        self.remove(id).await;
        self.credentials.delete(id).await?;
        tracing::info!(session_id = %id, "session state deleted");
        Ok(())
    }

    /// Release every connection, keeping devices linked.
    pub async fn shutdown(&self) {
        let sessions = self.sessions();
        futures::future::join_all(
            sessions
                .iter()
                .map(|s| s.shut_down(Teardown::Release, "shutting down")),
        )
        .await;

        for session in &sessions {
            evict(&self.slots, session.id(), session);
        }
        tracing::info!(count = sessions.len(), "registry shut down");
    }

    /// Find or install the slot for `id`, starting initialization if new.
    fn ensure(&self, id: &SessionId) -> (Arc<Session>, InitFuture) {
        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = slots.get(id) {
                if slot.session.state() != SessionState::Terminated {
                    return (Arc::clone(&slot.session), slot.init.clone());
                }
            }
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(id) {
            if slot.session.state() != SessionState::Terminated {
                return (Arc::clone(&slot.session), slot.init.clone());
            }
        }

        if let Some(stale) = slots.remove(id) {
            tokio::spawn(async move { stale.session.release().await });
        }

        let session = Arc::new(Session::new(id.clone(), Arc::clone(&self.router)));
        let init = self.start(Arc::clone(&session));
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        slots.insert(
            id.clone(),
            Slot {
                seq,
                session: Arc::clone(&session),
                init: init.clone(),
            },
        );
        tracing::info!(session_id = %id, "session created");

        (session, init)
    }

    /// Spawn the event driver and the connection attempt for a new session.
    fn start(&self, session: Arc<Session>) -> InitFuture {
        let (events_tx, events_rx) = mpsc::channel(self.config.event_queue.max(1));
        driver::spawn(
            Arc::clone(&session),
            events_rx,
            Arc::clone(&self.messages),
            self.config.inbound_queue,
        );

        let ctx = AuthContext::new(session.id().clone(), Arc::clone(&self.credentials));
        let connector = Arc::clone(&self.connector);
        let slots = Arc::clone(&self.slots);

        let attempt = tokio::spawn(async move {
            match connector.initialize(ctx, events_tx).await {
                Ok(client) => {
                    if let Some(mode) = session.attach_client(Arc::clone(&client)) {
                        // Torn down while the connection was opening.
                        session.close_client(client.as_ref(), mode).await;
                    }
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(session_id = %session.id(), error = %e, "initialize failed");
                    session.terminate(&e.to_string());
                    evict(&slots, session.id(), &session);
                    Err(RelayError::Provider(e))
                }
            }
        });

        async move {
            attempt
                .await
                .unwrap_or_else(|e| {
                    Err(RelayError::Provider(ClientError::Initialize(e.to_string())))
                })
        }
        .boxed()
        .shared()
    }
}

/// Remove `id` only if it still maps to `session`.
fn evict(slots: &RwLock<HashMap<SessionId, Slot>>, id: &SessionId, session: &Arc<Session>) {
    let mut slots = slots.write().unwrap_or_else(PoisonError::into_inner);
    if slots
        .get(id)
        .is_some_and(|slot| Arc::ptr_eq(&slot.session, session))
    {
        slots.remove(id);
    }
}
