//! HTTP API handlers
//!
//! One module per resource, each mapping 1:1 to a manager contract.

pub mod connectors;
pub mod devices;
pub mod events;
pub mod snapshots;
pub mod tasks;

use serde::Serialize;

/// Message response returned by destructive operations
#[derive(Serialize)]
pub struct MessageResponse {
    /// Human-readable message
    pub message: String,
    /// Status indicator (e.g., "ok", "error")
    pub status: String,
}

impl MessageResponse {
    /// An "ok" message
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: "ok".to_string(),
        }
    }
}
