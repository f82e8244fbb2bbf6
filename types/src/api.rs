//! API request and response types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub transport: String,
    pub running: bool,
    pub clients: usize,
}

/// Per-connection details reported by `GET /stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStats {
    /// Seconds since the last ping was delivered on this connection.
    pub last_ping_secs: f64,
    /// Items currently waiting in the delivery queue.
    pub queue_size: usize,
}

/// Response body for `GET /stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub messages_received: u64,
    pub batches_received: u64,
    pub errors: u64,
    pub sessions: usize,
    pub clients: HashMap<String, ClientStats>,
}

/// Acknowledgement body for a POST that did not open a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub status: String,
    pub message_count: usize,
}
