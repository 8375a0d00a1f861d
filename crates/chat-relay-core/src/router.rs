//! Per-session publish/subscribe channels with late-join replay.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use futures::{StreamExt, stream::BoxStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

use crate::{ChannelEvent, SessionId};

/// Default per-channel ring size.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Stream of channel events: replay first, then live updates.
pub type Subscription = BoxStream<'static, ChannelEvent>;

/// Event router with one bounded broadcast channel per session.
///
/// Publishing never waits on subscribers: a subscriber that falls more than
/// the channel capacity behind skips the events it missed.
pub struct EventRouter {
    channels: RwLock<HashMap<SessionId, broadcast::Sender<ChannelEvent>>>,
    capacity: usize,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    /// Create a router with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a router with a given per-channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Deliver an event to every current subscriber of `session_id`.
    ///
    /// Returns the number of subscribers reached. No subscribers is not an
    /// error.
    pub fn publish(&self, session_id: &SessionId, event: ChannelEvent) -> usize {
        let sender = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned();

        let Some(sender) = sender else {
            tracing::trace!(session_id = %session_id, event = event.name(), "no channel");
            return 0;
        };

        let name = event.name();
        if let Ok(receivers) = sender.send(event) {
            tracing::debug!(session_id = %session_id, event = name, receivers, "published");
            receivers
        } else {
            self.prune(session_id);
            0
        }
    }

    /// Join the channel for `session_id`.
    ///
    /// `replay` is yielded before any live event. Callers that need the replay
    /// to be consistent with live delivery must serialize this call with
    /// their own publishes.
    #[must_use]
    pub fn subscribe(&self, session_id: &SessionId, replay: Vec<ChannelEvent>) -> Subscription {
        let rx = {
            let mut channels = self
                .channels
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            channels
                .entry(session_id.clone())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };

        let id = session_id.clone();
        let live = BroadcastStream::new(rx).filter_map(move |res| {
            let event = match res {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(session_id = %id, skipped, "subscriber lagged, events dropped");
                    None
                }
            };
            futures::future::ready(event)
        });

        futures::stream::iter(replay).chain(live).boxed()
    }

    /// Number of live subscribers on a channel.
    #[must_use]
    pub fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn prune(&self, session_id: &SessionId) {
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if channels
            .get(session_id)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            channels.remove(session_id);
        }
    }
}
