//! WebSocket transport for session channels.
//!
//! A connection may join any number of session channels. Each join runs a
//! forwarder task that turns channel events into [`ServerMessage`]s; all of
//! them feed one bounded outbound queue drained by the socket writer.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use chat_relay_core::{SessionId, Subscription};
use chat_relay_session::SessionRegistry;
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use crate::{
    AppState,
    protocol::{ClientMessage, ServerMessage},
};

/// Per-connection outbound queue.
const OUTBOUND_QUEUE: usize = 256;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);
    let mut conn = Connection::new(Arc::clone(&state.registry), tx);
    tracing::info!(conn_id = %conn.id, "websocket connected");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(conn_id = %conn.id, "WebSocket error: {e}");
                break;
            }
        };

        let handled = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(client_msg) => conn.handle(client_msg).await,
            Err(e) => {
                tracing::debug!(conn_id = %conn.id, "Invalid client message: {e}");
                conn.reply(ServerMessage::error(format!("Invalid message: {e}")))
                    .await
            }
        };
        if !handled {
            break;
        }
    }

    tracing::info!(conn_id = %conn.id, channels = conn.channels.len(), "websocket closed");
    drop(conn);
    send_task.abort();
}

/// Channel membership of one socket.
struct Connection {
    id: Uuid,
    registry: Arc<SessionRegistry>,
    outbound: mpsc::Sender<ServerMessage>,
    channels: HashMap<SessionId, JoinHandle<()>>,
}

impl Connection {
    fn new(registry: Arc<SessionRegistry>, outbound: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry,
            outbound,
            channels: HashMap::new(),
        }
    }

    /// Apply one client message. Returns `false` once the writer is gone.
    async fn handle(&mut self, msg: ClientMessage) -> bool {
        match msg {
            ClientMessage::Join { session_id } => self.join(session_id).await,
            ClientMessage::Leave { session_id } => {
                if let Some(task) = self.channels.remove(&session_id) {
                    task.abort();
                }
                self.reply(ServerMessage::Left { session_id }).await
            }
            ClientMessage::Ping => self.reply(ServerMessage::Pong).await,
        }
    }

    /// Joining an already joined channel resubscribes, so the client gets a
    /// fresh replay.
    async fn join(&mut self, session_id: SessionId) -> bool {
        if let Some(task) = self.channels.remove(&session_id) {
            task.abort();
        }
        let subscription = self.registry.subscribe(&session_id);
        let joined = ServerMessage::Joined {
            session_id: session_id.clone(),
        };
        if !self.reply(joined).await {
            return false;
        }
        tracing::debug!(conn_id = %self.id, session_id = %session_id, "channel joined");

        let task = tokio::spawn(forward(
            session_id.clone(),
            subscription,
            self.outbound.clone(),
        ));
        self.channels.insert(session_id, task);
        true
    }

    async fn reply(&self, msg: ServerMessage) -> bool {
        self.outbound.send(msg).await.is_ok()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in self.channels.values() {
            task.abort();
        }
    }
}

async fn forward(
    session_id: SessionId,
    mut subscription: Subscription,
    outbound: mpsc::Sender<ServerMessage>,
) {
    while let Some(event) = subscription.next().await {
        let msg = ServerMessage::from_channel(session_id.clone(), event);
        if outbound.send(msg).await.is_err() {
            break;
        }
    }
}
