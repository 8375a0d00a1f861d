//! Per-session lifecycle state machine.

use std::sync::{Arc, Mutex as SyncMutex, OnceLock, PoisonError};

use chat_relay_core::{
    ChannelEvent, ClientEvent, EventRouter, EventTag, MessagingClient, SessionId, Subscription,
    now_millis,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Connection is being opened, no pairing payload yet.
    Uninitialized,
    /// A QR payload is waiting to be scanned.
    AwaitingScan,
    /// Pairing accepted, waiting for the connection to come up.
    Authenticating,
    /// Connected; sends are allowed.
    Ready,
    /// Connection gone. Absorbing for this registry entry.
    Terminated,
}

impl SessionState {
    /// Transition table.
    ///
    /// Returns the next state for a lifecycle event, or `None` when the event
    /// does not apply in this state. `Message` never changes state.
    #[must_use]
    pub const fn next(self, tag: EventTag) -> Option<Self> {
        match (self, tag) {
            (Self::Terminated, _) | (_, EventTag::Message) => None,
            (_, EventTag::Disconnected) => Some(Self::Terminated),
            (Self::Uninitialized | Self::AwaitingScan, EventTag::Qr) => Some(Self::AwaitingScan),
            (Self::Uninitialized | Self::AwaitingScan, EventTag::Authenticated) => {
                Some(Self::Authenticating)
            }
            (Self::Authenticating, EventTag::Ready) => Some(Self::Ready),
            _ => None,
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub state: SessionState,
    /// Only set while `AwaitingScan`.
    pub qr: Option<String>,
    /// Unix epoch milliseconds of the last transition to `Ready`.
    pub ready_at: Option<i64>,
}

impl SessionSnapshot {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::Uninitialized,
            qr: None,
            ready_at: None,
        }
    }

    /// Events that bring a late subscriber up to the current state.
    fn replay(&self) -> Vec<ChannelEvent> {
        match (self.state, &self.qr) {
            (SessionState::AwaitingScan, Some(qr)) => vec![ChannelEvent::Qr { qr: qr.clone() }],
            (SessionState::Ready, _) => vec![ChannelEvent::Ready],
            _ => Vec::new(),
        }
    }
}

/// How a session is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Unlink the device, then release the connection.
    Logout,
    /// Release the connection but keep the device linked.
    Release,
}

/// One managed connection.
///
/// State lives in a `watch` channel: transitions and channel joins both run
/// under its lock, so a joiner either sees a state in its replay or receives
/// the transition live.
pub struct Session {
    id: SessionId,
    state: watch::Sender<SessionSnapshot>,
    router: Arc<EventRouter>,
    client: OnceLock<Arc<dyn MessagingClient>>,
    /// Teardown requested before the client attached. Guards handover of the
    /// client between `attach_client` and `shut_down`.
    requested: SyncMutex<Option<Teardown>>,
    torn_down: Mutex<bool>,
}

impl Session {
    pub(crate) fn new(id: SessionId, router: Arc<EventRouter>) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::new(id.clone()));
        Self {
            id,
            state,
            router,
            client: OnceLock::new(),
            requested: SyncMutex::new(None),
            torn_down: Mutex::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().state
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Current QR payload, if awaiting a scan.
    #[must_use]
    pub fn qr(&self) -> Option<String> {
        self.state.borrow().qr.clone()
    }

    /// Receiver for state changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    /// Join this session's channel with a replay of the current state.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let snapshot = self.state.borrow();
        self.router.subscribe(&self.id, snapshot.replay())
    }

    /// Publish a non-lifecycle event on this session's channel.
    pub fn publish(&self, event: ChannelEvent) -> usize {
        self.router.publish(&self.id, event)
    }

    /// Apply a lifecycle event.
    ///
    /// Returns the new state if the event caused a transition.
    pub fn apply(&self, event: &ClientEvent) -> Option<SessionState> {
        let mut entered = None;
        self.state.send_if_modified(|snap| {
            let Some(next) = snap.state.next(event.tag()) else {
                tracing::debug!(
                    session_id = %self.id,
                    state = ?snap.state,
                    event = ?event.tag(),
                    "ignoring event"
                );
                return false;
            };

            let published = match event {
                ClientEvent::Qr(payload) => {
                    snap.qr = Some(payload.clone());
                    ChannelEvent::Qr {
                        qr: payload.clone(),
                    }
                }
                ClientEvent::Authenticated => {
                    snap.qr = None;
                    ChannelEvent::Authenticated
                }
                ClientEvent::Ready => {
                    snap.qr = None;
                    snap.ready_at = Some(now_millis());
                    ChannelEvent::Ready
                }
                ClientEvent::Disconnected { reason } => {
                    snap.qr = None;
                    snap.ready_at = None;
                    ChannelEvent::Disconnected {
                        reason: reason.clone(),
                    }
                }
                ClientEvent::Message(_) => return false,
            };

            tracing::info!(
                session_id = %self.id,
                from = ?snap.state,
                to = ?next,
                "session transition"
            );
            snap.state = next;
            self.router.publish(&self.id, published);
            entered = Some(next);
            true
        });
        entered
    }

    /// Force `Terminated`. Returns false if already terminated.
    pub(crate) fn terminate(&self, reason: &str) -> bool {
        self.apply(&ClientEvent::Disconnected {
            reason: reason.to_string(),
        })
        .is_some()
    }

    /// Attach the opened client.
    ///
    /// Returns the teardown mode if the session was shut down while the
    /// connection was opening; the caller then owns closing the client.
    pub(crate) fn attach_client(&self, client: Arc<dyn MessagingClient>) -> Option<Teardown> {
        let requested = self.requested.lock().unwrap_or_else(PoisonError::into_inner);
        if self.client.set(client).is_err() {
            tracing::warn!(session_id = %self.id, "client already attached");
        }
        *requested
    }

    /// Provider client, only while `Ready`.
    pub(crate) fn ready_client(&self) -> Option<Arc<dyn MessagingClient>> {
        if self.is_ready() {
            self.client.get().cloned()
        } else {
            None
        }
    }

    /// Terminate, then tear the provider connection down.
    ///
    /// Runs once; later calls wait for the first to finish and return.
    pub(crate) async fn shut_down(&self, mode: Teardown, reason: &str) {
        let mut done = self.torn_down.lock().await;
        if *done {
            return;
        }

        self.terminate(reason);

        let client = {
            let mut requested = self.requested.lock().unwrap_or_else(PoisonError::into_inner);
            *requested = Some(mode);
            self.client.get().cloned()
        };
        if let Some(client) = client {
            self.close_client(client.as_ref(), mode).await;
        }

        tracing::info!(session_id = %self.id, ?mode, "session torn down");
        *done = true;
    }

    /// Log out if asked to, then release the connection.
    pub(crate) async fn close_client(&self, client: &dyn MessagingClient, mode: Teardown) {
        if mode == Teardown::Logout {
            if let Err(e) = client.logout().await {
                tracing::warn!(session_id = %self.id, error = %e, "logout failed");
            }
        }
        if let Err(e) = client.destroy().await {
            tracing::warn!(session_id = %self.id, error = %e, "destroy failed");
        }
    }

    /// Release a connection left behind by a replaced entry.
    pub(crate) async fn release(&self) {
        self.shut_down(Teardown::Release, "replaced").await;
    }
}
