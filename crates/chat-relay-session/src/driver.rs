//! Per-session provider event processing.

use std::sync::Arc;

use chat_relay_core::{
    ChannelEvent, ClientEvent, InboundMessage, MessageRecord, MessageStore,
    address::normalize_sender,
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};

use crate::{Session, SessionState};

/// Spawn the tasks that consume one session's provider events.
///
/// Lifecycle events are applied inline. Inbound messages go to a separate
/// bounded worker; when it is `inbound_queue` messages behind, further
/// messages are dropped and reported on the channel so lifecycle events are
/// never held up by a slow store.
pub(crate) fn spawn(
    session: Arc<Session>,
    mut events: mpsc::Receiver<ClientEvent>,
    store: Arc<dyn MessageStore>,
    inbound_queue: usize,
) -> JoinHandle<()> {
    let (inbound_tx, inbound_rx) = mpsc::channel(inbound_queue.max(1));
    let worker = tokio::spawn(inbound_worker(Arc::clone(&session), inbound_rx, store));

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Message(message) => {
                    if session.state() == SessionState::Terminated {
                        tracing::debug!(
                            session_id = %session.id(),
                            "dropping message for terminated session"
                        );
                        continue;
                    }
                    match inbound_tx.try_send(message) {
                        Ok(()) => {}
                        Err(TrySendError::Full(dropped)) => {
                            tracing::warn!(
                                session_id = %session.id(),
                                from = %dropped.from,
                                "inbound queue full, dropping message"
                            );
                            session.publish(ChannelEvent::Error {
                                message: format!(
                                    "inbound queue full, dropped message from {}",
                                    normalize_sender(&dropped.from)
                                ),
                            });
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
                lifecycle => {
                    session.apply(&lifecycle);
                }
            }
        }

        if session.terminate("connection closed") {
            tracing::info!(session_id = %session.id(), "provider closed event stream");
        }

        drop(inbound_tx);
        if let Err(e) = worker.await {
            tracing::error!(session_id = %session.id(), error = %e, "inbound worker failed");
        }
    })
}

async fn inbound_worker(
    session: Arc<Session>,
    mut rx: mpsc::Receiver<InboundMessage>,
    store: Arc<dyn MessageStore>,
) {
    while let Some(message) = rx.recv().await {
        handle_inbound(&session, store.as_ref(), message).await;
    }
}

/// Persist an inbound message, then publish it.
///
/// A failed write is logged and reported on the channel; the message is
/// published either way.
pub(crate) async fn handle_inbound(
    session: &Session,
    store: &dyn MessageStore,
    message: InboundMessage,
) -> MessageRecord {
    let from = normalize_sender(&message.from);
    let record = MessageRecord::now(
        session.id().clone(),
        from,
        session.id().as_str(),
        message.body,
    );

    if let Err(e) = store.append(&record).await {
        tracing::error!(
            session_id = %session.id(),
            error = %e,
            "failed to persist inbound message"
        );
        session.publish(ChannelEvent::Error {
            message: format!("failed to persist inbound message: {e}"),
        });
    }

    session.publish(ChannelEvent::Message {
        record: record.clone(),
    });
    record
}
