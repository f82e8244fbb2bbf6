//! Client connections and the live connection table.
//!
//! Each open SSE stream is backed by one [`ClientConnection`]: a bounded
//! delivery queue, a monotonically increasing event counter and a liveness
//! timestamp. The table owns the connections; everything else (sweeper,
//! broadcast, event log) refers to them by id only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::QUEUE_CAPACITY;

/// One item waiting in a connection's delivery queue.
#[derive(Debug, Clone)]
pub enum StreamItem {
    /// First event on a new stream.
    Connected,
    /// A single serialized JSON-RPC message.
    Message(String),
    /// A serialized JSON array of JSON-RPC messages.
    Batch(String),
    /// Keepalive carrying a unix-millisecond timestamp.
    Ping(i64),
    /// Re-delivery of a logged event, keeping its original id.
    Replay { event_id: String, data: String },
    /// End the stream.
    Close,
}

/// A single client's streaming connection.
#[derive(Debug)]
pub struct ClientConnection {
    /// Unique connection identifier (`client_{n}`).
    pub id: String,
    /// Session this stream belongs to, if any.
    pub session_id: Option<String>,
    sender: mpsc::Sender<StreamItem>,
    last_ping: RwLock<Instant>,
    event_counter: AtomicU64,
}

impl ClientConnection {
    /// Enqueue an item for delivery. Fails if the queue is full or the
    /// stream has gone away; the caller decides whether that matters.
    pub fn enqueue(&self, item: StreamItem) -> Result<(), mpsc::error::TrySendError<StreamItem>> {
        self.sender.try_send(item)
    }

    /// Next event id for this connection: `{connectionId}_{counter}`.
    ///
    /// The counter never repeats or decreases, so ids are globally unique
    /// and orderable per connection, and the originating connection can be
    /// recovered from the id string alone.
    pub fn next_event_id(&self) -> String {
        let n = self.event_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}_{}", self.id, n)
    }

    /// Record that a ping was just delivered on this stream.
    pub fn touch_ping(&self) {
        *self.last_ping.write() = Instant::now();
    }

    /// Time since the last delivered ping.
    pub fn last_ping_elapsed(&self) -> Duration {
        self.last_ping.read().elapsed()
    }

    /// Items currently waiting in the delivery queue.
    pub fn queue_depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

/// Table of live connections, keyed by connection id.
#[derive(Default)]
pub struct ConnectionTable {
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
    counter: AtomicU64,
}

impl ConnectionTable {
    /// Register a new connection, returning its handle and the receiving
    /// end of its delivery queue.
    pub fn register(
        &self,
        session_id: Option<String>,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<StreamItem>) {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let connection = Arc::new(ClientConnection {
            id: format!("client_{}", n),
            session_id,
            sender,
            last_ping: RwLock::new(Instant::now()),
            event_counter: AtomicU64::new(0),
        });
        self.connections
            .write()
            .insert(connection.id.clone(), connection.clone());
        debug!("Registered connection {}", connection.id);
        (connection, receiver)
    }

    /// Remove a connection from the table. Returns the handle if it was
    /// still registered.
    pub fn remove(&self, id: &str) -> Option<Arc<ClientConnection>> {
        let removed = self.connections.write().remove(id);
        if removed.is_some() {
            debug!("Removed connection {}", id);
        }
        removed
    }

    /// Get a connection by id.
    pub fn get(&self, id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.read().get(id).cloned()
    }

    /// Snapshot of all live connections.
    pub fn all(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Enqueue a pre-serialized payload onto every live connection's queue.
    ///
    /// A failure to enqueue for one connection is logged and skipped;
    /// delivery to the others proceeds. Returns the number of failures.
    pub fn fan_out(&self, item: &StreamItem) -> usize {
        let mut failed = 0;
        for connection in self.all() {
            if let Err(e) = connection.enqueue(item.clone()) {
                warn!("Failed to queue event for {}: {}", connection.id, e);
                failed += 1;
            }
        }
        failed
    }

    /// Send a close item to every connection and empty the table.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.connections.write().drain().collect();
        for (id, connection) in drained {
            if connection.enqueue(StreamItem::Close).is_err() {
                debug!("Connection {} already closing", id);
            }
        }
    }
}
