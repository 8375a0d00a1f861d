//! Session orchestration and storage for chat relays.
//!
//! Provides:
//! - `SessionRegistry` - Single-flight creation and teardown of sessions
//! - `Session` - Lifecycle state machine driven by provider events
//! - `MessageDispatcher` - Send, broadcast and history
//! - Storage implementations (memory, file credentials, SQLite)

pub mod config;
pub mod dispatcher;
mod driver;
pub mod error;
pub mod registry;
pub mod session;
pub mod storage;

pub use config::RelayConfig;
pub use dispatcher::{BroadcastResult, MessageDispatcher};
pub use error::{ErrorKind, RelayError};
pub use registry::{SessionRegistry, SessionSummary};
pub use session::{Session, SessionSnapshot, SessionState};
