//! REST routes over the registry and dispatcher.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chat_relay_core::{ClientError, HistoryFilter, MessageRecord, SessionId};
use chat_relay_session::{
    BroadcastResult, MessageDispatcher, RelayError, SessionRegistry, SessionState,
    SessionSummary,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{ApiError, qr, websocket};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Arc<MessageDispatcher>,
}

impl AppState {
    /// Create state with a dispatcher over `registry`.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        let dispatcher = Arc::new(MessageDispatcher::new(Arc::clone(&registry)));
        Self {
            registry,
            dispatcher,
        }
    }
}

/// Build the HTTP router, WebSocket endpoint included.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", axum::routing::delete(delete_session))
        .route("/sessions/{id}/qr", get(session_qr))
        .route("/sessions/{id}/status", get(session_status))
        .route(
            "/sessions/{id}/messages",
            get(message_history).post(send_message),
        )
        .route("/sessions/{id}/logout", post(logout))
        .route("/broadcast", post(broadcast))
        .route("/ws", get(websocket::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub ready: bool,
    pub state: SessionState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QrResponse {
    pub ready: bool,
    pub state: SessionState,
    /// SVG data URL, present only while awaiting a scan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendRequest {
    pub to: String,
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub message_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub since: Option<i64>,
}

async fn health() -> &'static str {
    "ok"
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.registry.list())
}

async fn session_qr(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QrResponse>, ApiError> {
    let id = SessionId::parse(id)?;
    let snapshot = state.registry.get_or_create(&id).await?.snapshot();
    let qr = snapshot
        .qr
        .as_deref()
        .map(qr::render_data_url)
        .transpose()
        .map_err(|e| RelayError::Provider(ClientError::Initialize(e.to_string())))?;
    Ok(Json(QrResponse {
        ready: snapshot.state == SessionState::Ready,
        state: snapshot.state,
        qr,
    }))
}

async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id = SessionId::parse(id)?;
    let session = state.registry.get_or_create(&id).await?;
    Ok(Json(StatusResponse {
        ready: session.is_ready(),
        state: session.state(),
    }))
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let id = SessionId::parse(id)?;
    let message_id = state.dispatcher.send(&id, &req.to, &req.body).await?;
    Ok(Json(SendResponse { message_id }))
}

async fn message_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageRecord>>, ApiError> {
    let id = SessionId::parse(id)?;
    let filter = HistoryFilter {
        since: query.since,
        limit: query.limit,
    };
    Ok(Json(state.dispatcher.history(&id, filter).await?))
}

async fn broadcast(
    State(state): State<AppState>,
    Json(req): Json<SendRequest>,
) -> Result<Json<Vec<BroadcastResult>>, ApiError> {
    Ok(Json(state.dispatcher.broadcast(&req.to, &req.body).await?))
}

async fn logout(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = SessionId::parse(id)?;
    state.registry.logout(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = SessionId::parse(id)?;
    state.registry.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::{Body, to_bytes},
        http::{Request, Response},
    };
    use chat_relay_core::{ClientEvent, testing::ScriptedConnector};
    use chat_relay_session::{
        RelayConfig,
        storage::{MemoryCredentialStore, MemoryMessageStore},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;

    struct TestApp {
        connector: ScriptedConnector,
        state: AppState,
    }

    impl TestApp {
        fn new() -> Self {
            let connector = ScriptedConnector::new();
            let registry = Arc::new(SessionRegistry::new(
                Arc::new(connector.clone()),
                Arc::new(MemoryCredentialStore::new()),
                Arc::new(MemoryMessageStore::new()),
                RelayConfig::default(),
            ));
            Self {
                connector,
                state: AppState::new(registry),
            }
        }

        async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = create_router(self.state.clone())
                .oneshot(request)
                .await
                .unwrap();
            read_json(response).await
        }

        async fn get(&self, uri: &str) -> (StatusCode, Value) {
            self.call(Request::get(uri).body(Body::empty()).unwrap())
                .await
        }

        async fn post(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
            self.call(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
        }

        async fn ready(&self, name: &str) {
            let id = SessionId::parse(name).unwrap();
            let session = self.state.registry.get_or_create(&id).await.unwrap();
            self.connector.pair(&id).await;
            let mut rx = session.watch();
            tokio::time::timeout(
                Duration::from_secs(2),
                rx.wait_for(|s| s.state == SessionState::Ready),
            )
            .await
            .unwrap()
            .unwrap();
        }
    }

    async fn read_json(response: Response<Body>) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new();
        let (status, body) = app.get("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_status_creates_session_lazily() {
        let app = TestApp::new();

        let (status, body) = app.get("/sessions/shop/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ready": false, "state": "uninitialized" }));

        let (_, list) = app.get("/sessions").await;
        assert_eq!(list[0]["id"], "shop");
    }

    #[tokio::test]
    async fn test_qr_returns_data_url_while_awaiting_scan() {
        let app = TestApp::new();
        let id = SessionId::parse("shop").unwrap();
        let session = app.state.registry.get_or_create(&id).await.unwrap();
        app.connector.emit(&id, ClientEvent::Qr("ref-1".into())).await;
        let mut rx = session.watch();
        rx.wait_for(|s| s.qr.is_some()).await.unwrap();

        let (status, body) = app.get("/sessions/shop/qr").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "awaiting_scan");
        assert!(
            body["qr"]
                .as_str()
                .unwrap()
                .starts_with("data:image/svg+xml;base64,")
        );
    }

    #[tokio::test]
    async fn test_qr_omitted_when_ready() {
        let app = TestApp::new();
        app.ready("shop").await;

        let (status, body) = app.get("/sessions/shop/qr").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ready": true, "state": "ready" }));
    }

    #[tokio::test]
    async fn test_invalid_session_id_is_bad_request() {
        let app = TestApp::new();
        let (status, body) = app.get("/sessions/.hidden/status").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_send_requires_ready_session() {
        let app = TestApp::new();
        let (status, body) = app
            .post(
                "/sessions/shop/messages",
                &json!({ "to": "15550100", "body": "hi" }),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "not_ready");
        assert!(app.connector.sent().is_empty());
    }

    #[tokio::test]
    async fn test_send_then_history() {
        let app = TestApp::new();
        app.ready("shop").await;

        let (status, body) = app
            .post(
                "/sessions/shop/messages",
                &json!({ "to": "15550100", "body": "hi" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message_id"].is_string());

        let (status, history) = app.get("/sessions/shop/messages?limit=10").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history[0]["from"], "admin");
        assert_eq!(history[0]["to"], "15550100");
        assert_eq!(history[0]["body"], "hi");
    }

    #[tokio::test]
    async fn test_provider_failure_is_bad_gateway() {
        let app = TestApp::new();
        app.ready("shop").await;
        app.connector.fail_sends(&SessionId::parse("shop").unwrap());

        let (status, body) = app
            .post(
                "/sessions/shop/messages",
                &json!({ "to": "15550100", "body": "hi" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "provider_error");
    }

    #[tokio::test]
    async fn test_broadcast_reports_each_session() {
        let app = TestApp::new();
        app.ready("a").await;
        app.get("/sessions/b/status").await;

        let (status, body) = app
            .post("/broadcast", &json!({ "to": "15550100", "body": "hi" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["session_id"], "a");
        assert_eq!(body[0]["success"], true);
        assert_eq!(body[1]["session_id"], "b");
        assert_eq!(body[1]["error"], "not_ready");
    }

    #[tokio::test]
    async fn test_logout_unknown_session_is_not_found() {
        let app = TestApp::new();
        let (status, body) = app.post("/sessions/ghost/logout", &json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let app = TestApp::new();
        app.ready("shop").await;

        for _ in 0..2 {
            let (status, _) = app
                .call(
                    Request::delete("/sessions/shop")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await;
            assert_eq!(status, StatusCode::NO_CONTENT);
        }
        let (_, list) = app.get("/sessions").await;
        assert_eq!(list, json!([]));
    }
}
