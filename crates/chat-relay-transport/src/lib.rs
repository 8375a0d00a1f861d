//! HTTP and WebSocket surface for chat relays.
//!
//! Provides:
//! - Wire protocol (JSON, QR payloads as SVG data URLs)
//! - REST routes over the registry and dispatcher (feature: http)
//! - WebSocket channel joins (feature: http)

pub mod protocol;
pub mod qr;

#[cfg(feature = "http")]
pub mod error;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub mod websocket;

pub use protocol::{ClientMessage, ServerMessage};

#[cfg(feature = "http")]
pub use error::ApiError;

#[cfg(feature = "http")]
pub use http::{AppState, create_router};
