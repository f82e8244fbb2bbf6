//! MCP (Model Context Protocol) Streamable HTTP transport.
//!
//! Implements the MCP Streamable HTTP transport with session management,
//! resumable SSE streams and keepalive sweeping, allowing AI assistants to
//! talk to the Strata dataset server over a standard HTTP endpoint.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - Send JSON-RPC messages (returns 202, JSON or SSE)
//! - `GET /mcp` - Open SSE stream for server-initiated messages
//! - `DELETE /mcp` - Terminate a session
//!
//! ## Session Management
//!
//! Sessions are identified by the `Mcp-Session-Id` header, assigned when an
//! `initialize` request arrives without one and validated (with a liveness
//! touch) on every subsequent request that carries it.

use std::time::Duration;

pub mod connection;
pub mod event_log;
pub mod session;
pub mod sweeper;

pub use connection::{ClientConnection, ConnectionTable, StreamItem};
pub use event_log::EventLog;
pub use session::McpSessionManager;

/// How long a stream waits on its queue before synthesizing its own ping.
pub const QUEUE_WAIT: Duration = Duration::from_secs(30);

/// Period of the background keepalive sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// A connection with no delivered ping for longer than this is evicted.
pub const STALE_AFTER: Duration = Duration::from_secs(60);

/// Bound of each connection's delivery queue.
pub const QUEUE_CAPACITY: usize = 256;
