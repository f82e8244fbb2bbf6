//! MCP session management.
//!
//! Manages session lifecycle for MCP Streamable HTTP connections.
//! Sessions are identified by cryptographically secure UUIDs. Validation
//! doubles as a liveness touch: every authenticated interaction refreshes
//! `last_accessed` without a separate round-trip.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// An MCP session.
#[derive(Debug, Clone)]
pub struct McpSession {
    /// Unique session identifier.
    pub id: String,
    /// When the session was created.
    pub created_at: Instant,
    /// When the session was last validated.
    pub last_accessed: Instant,
    /// Free-form client metadata (e.g. negotiated protocol version).
    pub client_info: HashMap<String, String>,
}

impl McpSession {
    /// Create a new session with a unique ID.
    pub fn new(client_info: HashMap<String, String>) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            last_accessed: now,
            client_info,
        }
    }

    /// Get the session age in seconds.
    pub fn age_secs(&self) -> u64 {
        self.created_at.elapsed().as_secs()
    }
}

/// Manager for MCP sessions.
#[derive(Clone, Default)]
pub struct McpSessionManager {
    sessions: Arc<RwLock<HashMap<String, McpSession>>>,
}

impl McpSessionManager {
    /// Create a new session manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new session and return its ID.
    pub async fn create(&self, client_info: HashMap<String, String>) -> String {
        let session = McpSession::new(client_info);
        let id = session.id.clone();
        let mut sessions = self.sessions.write().await;
        sessions.insert(id.clone(), session);
        info!("Created MCP session: {}", id);
        id
    }

    /// Validate a session ID, refreshing its last-accessed time on success.
    ///
    /// Unknown and empty identifiers are invalid.
    pub async fn validate(&self, id: &str) -> bool {
        if id.is_empty() {
            return false;
        }
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(session) => {
                session.last_accessed = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Get a snapshot of a session by ID.
    pub async fn get(&self, id: &str) -> Option<McpSession> {
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned()
    }

    /// Terminate a session. Terminating an unknown ID is a no-op.
    pub async fn terminate(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(id).is_some() {
            info!("Terminated MCP session: {}", id);
            true
        } else {
            false
        }
    }

    /// Get the number of active sessions.
    pub async fn count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Remove all sessions.
    pub async fn clear(&self) {
        let mut sessions = self.sessions.write().await;
        sessions.clear();
    }
}
