//! Chat relay gateway backed by a loopback provider.
//!
//! Run with: cargo run -p gateway-server
//!
//! Then open http://localhost:3000, pick a session id and watch it pair.

mod loopback;

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{response::Html, routing::get};
use chat_relay_core::{CredentialStore, MessageStore};
use chat_relay_session::{
    RelayConfig, SessionRegistry,
    storage::{FileCredentialStore, MemoryCredentialStore, MemoryMessageStore},
};
use chat_relay_transport::{AppState, create_router};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::loopback::LoopbackConnector;

/// Chat relay gateway.
#[derive(Parser, Debug)]
#[command(name = "gateway-server", about = "Chat relay gateway")]
struct ServerConfig {
    /// Address to bind.
    #[arg(long, env = "RELAY_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Directory for stored credentials (in memory when unset).
    #[arg(long, env = "RELAY_CREDENTIALS_DIR")]
    credentials_dir: Option<PathBuf>,

    /// SQLite URL for message history (in memory when unset).
    #[arg(long, env = "RELAY_DATABASE_URL")]
    database_url: Option<String>,

    /// Per-session channel buffer.
    #[arg(long, env = "RELAY_CHANNEL_CAPACITY")]
    channel_capacity: Option<usize>,

    /// Emit logs as JSON.
    #[arg(long, env = "RELAY_LOG_JSON")]
    log_json: bool,

    /// Delay before the loopback provider accepts a QR scan.
    #[arg(long, env = "RELAY_PAIR_DELAY_MS", default_value_t = 3000)]
    pair_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();
    init_tracing(config.log_json);

    let mut relay = RelayConfig::default();
    if let Some(capacity) = config.channel_capacity {
        relay.channel_capacity = capacity;
    }

    let registry = Arc::new(SessionRegistry::new(
        Arc::new(LoopbackConnector::new(Duration::from_millis(
            config.pair_delay_ms,
        ))),
        credential_store(&config).await?,
        message_store(&config).await?,
        relay,
    ));

    let app = create_router(AppState::new(Arc::clone(&registry))).route("/", get(index_handler));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    tracing::info!("Server listening on http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    registry.shutdown().await;
    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().flatten_event(true)).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn credential_store(config: &ServerConfig) -> Result<Arc<dyn CredentialStore>> {
    match &config.credentials_dir {
        Some(dir) => {
            let store = FileCredentialStore::open(dir)
                .await
                .with_context(|| format!("Failed to open credentials dir {}", dir.display()))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryCredentialStore::new())),
    }
}

#[cfg(feature = "sqlite")]
async fn message_store(config: &ServerConfig) -> Result<Arc<dyn MessageStore>> {
    match &config.database_url {
        Some(url) => {
            let store = chat_relay_session::storage::SqliteMessageStore::connect(url)
                .await
                .with_context(|| format!("Failed to open message database {url}"))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryMessageStore::new())),
    }
}

#[cfg(not(feature = "sqlite"))]
async fn message_store(config: &ServerConfig) -> Result<Arc<dyn MessageStore>> {
    if config.database_url.is_some() {
        anyhow::bail!("--database-url requires the `sqlite` feature");
    }
    Ok(Arc::new(MemoryMessageStore::new()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Chat Relay</title>
    <style>
        body { font-family: sans-serif; margin: 2em; background: #1e1e1e; color: #d4d4d4; }
        #qr img { background: #fff; padding: 8px; }
        #log { font-family: monospace; white-space: pre-wrap; }
    </style>
</head>
<body>
    <form id="join">
        <input id="session" value="demo" />
        <button>Join</button>
    </form>
    <div id="state"></div>
    <div id="qr"></div>
    <form id="send">
        <input id="to" placeholder="recipient" />
        <input id="body" placeholder="message" />
        <button>Send</button>
    </form>
    <div id="log"></div>
    <script>
        const ws = new WebSocket(`ws://${location.host}/ws`);
        const $ = (id) => document.getElementById(id);
        const log = (line) => { $('log').textContent = line + '\n' + $('log').textContent; };

        ws.onmessage = (e) => {
            const msg = JSON.parse(e.data);
            switch (msg.type) {
                case 'qr':
                    $('qr').innerHTML = `<img src="${msg.qr}" />`;
                    $('state').textContent = 'awaiting scan';
                    break;
                case 'authenticated':
                case 'ready':
                case 'disconnected':
                    $('qr').innerHTML = '';
                    $('state').textContent = msg.type;
                    break;
                case 'message':
                    log(`${msg.from} -> ${msg.to}: ${msg.body}`);
                    break;
                case 'error':
                    log(`error: ${msg.message}`);
                    break;
            }
        };

        $('join').onsubmit = (e) => {
            e.preventDefault();
            ws.send(JSON.stringify({ type: 'join', session_id: $('session').value }));
        };

        $('send').onsubmit = async (e) => {
            e.preventDefault();
            const res = await fetch(`/sessions/${$('session').value}/messages`, {
                method: 'POST',
                headers: { 'content-type': 'application/json' },
                body: JSON.stringify({ to: $('to').value, body: $('body').value }),
            });
            if (!res.ok) log(`send failed: ${(await res.json()).message}`);
        };
    </script>
</body>
</html>
"#;
