//! In-process provider that pairs itself and echoes outbound messages.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chat_relay_core::{
    AuthContext, ClientConnector, ClientError, ClientEvent, InboundMessage, MessagingClient,
    SentMessage,
};
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

/// Pairs every session after a fixed delay.
///
/// Sessions with stored credentials skip the QR step.
pub struct LoopbackConnector {
    pair_delay: Duration,
}

impl LoopbackConnector {
    #[must_use]
    pub const fn new(pair_delay: Duration) -> Self {
        Self { pair_delay }
    }
}

#[async_trait]
impl ClientConnector for LoopbackConnector {
    async fn initialize(
        &self,
        ctx: AuthContext,
        events: mpsc::Sender<ClientEvent>,
    ) -> Result<Arc<dyn MessagingClient>, ClientError> {
        let restored = ctx
            .load_credentials()
            .await
            .map_err(|e| ClientError::Initialize(e.to_string()))?
            .is_some();

        let pairing = events.clone();
        let delay = self.pair_delay;
        tokio::spawn(async move {
            if !restored {
                let payload = format!("loopback@{},{}", ctx.session_id, Uuid::new_v4());
                if pairing.send(ClientEvent::Qr(payload)).await.is_err() {
                    return;
                }
                tokio::time::sleep(delay).await;
                if let Err(e) = ctx.save_credentials(Uuid::new_v4().as_bytes()).await {
                    tracing::warn!(
                        session_id = %ctx.session_id,
                        "failed to store credentials: {e}"
                    );
                }
            }
            for event in [ClientEvent::Authenticated, ClientEvent::Ready] {
                if pairing.send(event).await.is_err() {
                    return;
                }
            }
        });

        Ok(Arc::new(LoopbackClient {
            events: Mutex::new(Some(events)),
        }))
    }
}

/// Echoes every sent message back as an inbound one.
struct LoopbackClient {
    events: Mutex<Option<mpsc::Sender<ClientEvent>>>,
}

impl LoopbackClient {
    async fn sender(&self) -> Result<mpsc::Sender<ClientEvent>, ClientError> {
        self.events.lock().await.clone().ok_or(ClientError::Closed)
    }
}

#[async_trait]
impl MessagingClient for LoopbackClient {
    async fn send_message(
        &self,
        chat_address: &str,
        body: &str,
    ) -> Result<SentMessage, ClientError> {
        let events = self.sender().await?;
        let echo = ClientEvent::Message(InboundMessage {
            from: chat_address.to_string(),
            body: body.to_string(),
        });
        events
            .send(echo)
            .await
            .map_err(|_| ClientError::Send("connection closed".into()))?;
        Ok(SentMessage {
            id: Uuid::new_v4().to_string(),
        })
    }

    async fn logout(&self) -> Result<(), ClientError> {
        let events = self.sender().await?;
        let _ = events
            .send(ClientEvent::Disconnected {
                reason: "LOGOUT".into(),
            })
            .await;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), ClientError> {
        self.events.lock().await.take();
        Ok(())
    }
}
