//! Shared types for the Strata dataset server.
//!
//! This crate contains the JSON-RPC envelope model and API types shared
//! between the backend transport and its clients.

/// Default port for the Strata backend server.
pub const DEFAULT_PORT: u16 = 8765;

/// MCP protocol versions this server accepts, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];

/// Protocol version assumed when a client sends no `MCP-Protocol-Version` header.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

pub mod api;
pub mod events;
pub mod jsonrpc;

// Re-export commonly used types
pub use api::{AckResponse, ClientStats, HealthResponse, StatsResponse};
pub use events::StreamEventKind;
pub use jsonrpc::{ClassifiedBatch, JsonRpcMessage};
