//! Stream event kinds delivered to connected clients.

use serde::{Deserialize, Serialize};

/// The `event:` field of an SSE record written to a client stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventKind {
    /// First record on a new stream, carries the connection id.
    Connected,
    /// A single JSON-RPC message.
    Message,
    /// A JSON array of JSON-RPC messages.
    Batch,
    /// Keepalive, carries a timestamp.
    Ping,
    /// Stream is closing.
    Close,
}

impl StreamEventKind {
    /// Wire name used in the SSE `event:` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Message => "message",
            Self::Batch => "batch",
            Self::Ping => "ping",
            Self::Close => "close",
        }
    }
}
