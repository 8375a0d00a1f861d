//! Core abstractions for multi-session messaging relays.
//!
//! This crate provides the fundamental building blocks:
//! - `SessionId` / `MessageRecord` - Identity and persisted history rows
//! - `ClientConnector` / `MessagingClient` - The external provider boundary
//! - `CredentialStore` / `MessageStore` - Storage traits
//! - `EventRouter` - Per-session channels with late-join replay
//! - `AuthContext` - What a provider connection is initialized with

pub mod address;
pub mod context;
pub mod event;
pub mod router;
pub mod traits;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use context::AuthContext;
pub use event::{ChannelEvent, ClientEvent, EventTag, InboundMessage};
pub use router::{EventRouter, Subscription};
pub use traits::{
    ClientConnector, ClientError, CredentialStore, HistoryFilter, InvalidSessionId, MessageRecord,
    MessageStore, MessagingClient, SentMessage, SessionId, StorageError, now_millis,
};
