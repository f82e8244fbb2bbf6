//! Bounded per-connection event history for resumable streams.
//!
//! Every event written to a stream is recorded here under its connection
//! id. A reconnecting client supplies `Last-Event-ID` and gets everything
//! strictly after it re-delivered with the original ids. Only the most
//! recent 100 entries per connection are retained; an id that has been
//! pruned out of the window replays nothing. That silent partial resume is
//! a documented limitation, not an error.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

/// Maximum retained events per connection.
pub const MAX_EVENTS_PER_CONNECTION: usize = 100;

/// One logged event.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub event_id: String,
    pub data: String,
}

/// Per-connection event history.
#[derive(Default)]
pub struct EventLog {
    history: RwLock<HashMap<String, VecDeque<EventRecord>>>,
}

impl EventLog {
    /// Append an event to a connection's history, evicting oldest-first
    /// beyond the retention bound.
    pub fn record(&self, connection_id: &str, event_id: String, data: String) {
        let mut history = self.history.write();
        let log = history.entry(connection_id.to_string()).or_default();
        log.push_back(EventRecord { event_id, data });
        while log.len() > MAX_EVENTS_PER_CONNECTION {
            log.pop_front();
        }
    }

    /// Events recorded strictly after `last_event_id`, in original order.
    ///
    /// The originating connection is recovered from the id itself
    /// (`{connectionId}_{counter}`), so resumption works on a fresh
    /// connection after a disconnect. If the id is not in the retained
    /// window the result is empty.
    pub fn replay_after(&self, last_event_id: &str) -> Vec<EventRecord> {
        let Some((connection_id, _)) = last_event_id.rsplit_once('_') else {
            return Vec::new();
        };
        let history = self.history.read();
        let Some(log) = history.get(connection_id) else {
            return Vec::new();
        };
        let mut replay = false;
        let mut out = Vec::new();
        for record in log {
            if record.event_id == last_event_id {
                replay = true;
                continue;
            }
            if replay {
                out.push(record.clone());
            }
        }
        out
    }

    /// Discard a connection's history.
    pub fn remove(&self, connection_id: &str) {
        self.history.write().remove(connection_id);
    }

    /// Discard all history.
    pub fn clear(&self) {
        self.history.write().clear();
    }

    /// Number of retained events for a connection.
    pub fn len(&self, connection_id: &str) -> usize {
        self.history
            .read()
            .get(connection_id)
            .map_or(0, VecDeque::len)
    }
}
