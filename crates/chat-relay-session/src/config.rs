//! Relay tuning.

use serde::{Deserialize, Serialize};

/// Queue sizes and naming used by the registry and dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Per-channel event ring; subscribers further behind skip events.
    pub channel_capacity: usize,
    /// Provider events buffered per session before the provider waits.
    pub event_queue: usize,
    /// Inbound messages buffered per session ahead of persistence.
    pub inbound_queue: usize,
    /// `from` recorded on outbound messages.
    pub outbound_sender: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            event_queue: 256,
            inbound_queue: 128,
            outbound_sender: "admin".to_string(),
        }
    }
}
