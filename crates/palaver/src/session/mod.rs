//! Session Management
//!
//! Sessions key the HTTP transports: each `Mcp-Session-Id` maps to a
//! last-seen timestamp, a pending-outbound queue for frames the client has
//! not picked up yet, and (when connected) a live SSE channel.

mod file;
mod store;

pub use file::FileSessionStore;
pub use store::{spawn_cleanup_task, InMemorySessionStore};

use axum::response::sse::Event;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::types::protocol::Implementation;

/// SSE event sender type alias.
pub type SseSender = mpsc::Sender<Result<Event, axum::Error>>;

/// An MCP session.
#[derive(Debug)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,

    /// When the session was created.
    pub created_at: Instant,

    /// Last activity timestamp.
    pub last_seen: Instant,

    /// Client implementation info (set after initialize).
    pub client_info: Option<Implementation>,

    /// Whether the session has completed initialization.
    pub initialized: bool,

    /// Outbound frames awaiting pickup (no live SSE channel).
    pub outbox: Vec<String>,

    /// SSE channel sender (None if disconnected).
    pub tx: Option<SseSender>,
}

impl Session {
    /// Create a new session with the given ID.
    pub fn new(id: String) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_seen: now,
            client_info: None,
            initialized: false,
            outbox: Vec::new(),
            tx: None,
        }
    }

    /// Check if the session has an active SSE connection.
    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false)
    }

    /// Time since last activity.
    pub fn idle_duration(&self) -> std::time::Duration {
        self.last_seen.elapsed()
    }

    /// Update the last_seen timestamp.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Mark the session as initialized with client info.
    pub fn set_initialized(&mut self, client_info: Implementation) {
        self.initialized = true;
        self.client_info = Some(client_info);
        self.touch();
    }
}

/// Statistics about active sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Total number of sessions.
    pub total: usize,
    /// Sessions with active SSE connections.
    pub connected: usize,
    /// Sessions without active connections.
    pub disconnected: usize,
}

/// Session store trait for pluggable storage backends.
pub trait SessionStore: Send + Sync {
    /// Get an existing session or create a new one.
    /// If `id_hint` is provided and exists, returns that session.
    /// If `id_hint` is provided but doesn't exist, creates with that ID.
    /// If `id_hint` is None, generates a new UUID.
    fn get_or_create(&self, id_hint: Option<&str>) -> String;

    /// True if a session with this id currently exists.
    fn contains(&self, id: &str) -> bool;

    /// Update the last_seen timestamp.
    fn touch(&self, id: &str);

    /// Mark a session as initialized.
    fn set_initialized(&self, id: &str, client_info: Implementation);

    /// Queue an outbound frame for pickup.
    fn push_outbound(&self, id: &str, frame: String);

    /// Take all queued outbound frames.
    fn drain_outbound(&self, id: &str) -> Vec<String>;

    /// Register an SSE connection for a session.
    fn register_sse(&self, id: &str, tx: SseSender);

    /// The live SSE sender for a session, if connected.
    fn sse_sender(&self, id: &str) -> Option<SseSender>;

    /// Ids of all live sessions.
    fn session_ids(&self) -> Vec<String>;

    /// Remove sessions idle longer than the given TTL.
    /// Returns the number of sessions removed.
    fn cleanup(&self, max_idle: std::time::Duration) -> usize;

    /// Remove a specific session by ID.
    fn remove(&self, id: &str);

    /// Get session statistics.
    fn stats(&self) -> SessionStats;
}
