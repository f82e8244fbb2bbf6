//! Shared application state.
//!
//! One `AppState` instance owns the session registry, the live connection
//! table, the event history and the transport counters, with an explicit
//! start/stop lifecycle. Everything is behind an `Arc` so the state can be
//! cloned into handlers, the sweeper and stream tasks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::mcp::{sweeper, ConnectionTable, EventLog, McpSessionManager, StreamItem};

/// Counters reported by `GET /stats`.
#[derive(Default)]
pub struct TransportStats {
    messages_received: AtomicU64,
    batches_received: AtomicU64,
    errors: AtomicU64,
}

impl TransportStats {
    pub fn add_messages(&self, n: usize) {
        self.messages_received
            .fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_batch(&self) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_errors(&self, n: usize) {
        self.errors.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// (messages_received, batches_received, errors)
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.messages_received.load(Ordering::Relaxed),
            self.batches_received.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        )
    }
}

struct StateInner {
    sessions: McpSessionManager,
    connections: ConnectionTable,
    event_log: EventLog,
    stats: TransportStats,
    running: AtomicBool,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to the transport's shared state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<StateInner>,
}

impl AppState {
    /// Create empty state. The transport is not running until `start`.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StateInner {
                sessions: McpSessionManager::new(),
                connections: ConnectionTable::default(),
                event_log: EventLog::default(),
                stats: TransportStats::default(),
                running: AtomicBool::new(false),
                shutdown_tx: Mutex::new(None),
                sweeper: Mutex::new(None),
            }),
        }
    }

    /// Mark the transport running and spawn the keepalive sweeper.
    pub fn start(&self) {
        let (tx, rx) = watch::channel(false);
        *self.inner.shutdown_tx.lock() = Some(tx);
        *self.inner.sweeper.lock() = Some(sweeper::spawn(self.clone(), rx));
        self.inner.running.store(true, Ordering::SeqCst);
        info!("Transport started");
    }

    /// Stop the transport: cancel the sweeper, close every connection and
    /// clear all tables so a restart begins from empty state.
    pub async fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.inner.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }
        let handle = self.inner.sweeper.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.inner.connections.close_all();
        self.inner.sessions.clear().await;
        self.inner.event_log.clear();
        info!("Transport stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> &McpSessionManager {
        &self.inner.sessions
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.inner.connections
    }

    pub fn event_log(&self) -> &EventLog {
        &self.inner.event_log
    }

    pub fn stats(&self) -> &TransportStats {
        &self.inner.stats
    }

    /// Serialize a message once and enqueue it on every live connection.
    ///
    /// A serialization failure drops the message for all recipients and
    /// counts one error; per-connection enqueue failures are isolated.
    pub fn broadcast_message(&self, message: &Value) {
        if self.connections().is_empty() {
            return;
        }
        match serde_json::to_string(message) {
            Ok(json) => {
                self.connections().fan_out(&StreamItem::Message(json));
            }
            Err(e) => {
                error!("Failed to serialize message: {}", e);
                self.stats().add_errors(1);
            }
        }
    }

    /// Serialize a batch once and enqueue it on every live connection.
    pub fn broadcast_batch(&self, messages: &[Value]) {
        if messages.is_empty() || self.connections().is_empty() {
            return;
        }
        match serde_json::to_string(messages) {
            Ok(json) => {
                self.connections().fan_out(&StreamItem::Batch(json));
            }
            Err(e) => {
                error!("Failed to serialize batch: {}", e);
                self.stats().add_errors(1);
            }
        }
    }

    /// Tear down one connection: deregister it, discard its history and
    /// signal its stream to finish. Used by the sweeper and shutdown; a
    /// normal client disconnect goes through the same removal via the
    /// stream's drop guard.
    pub fn close_connection(&self, id: &str) {
        if let Some(connection) = self.connections().remove(id) {
            self.event_log().remove(id);
            let _ = connection.enqueue(StreamItem::Close);
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
