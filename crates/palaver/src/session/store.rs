//! In-Memory Session Store
//!
//! DashMap-backed store plus the periodic cleanup task.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{Session, SessionStats, SessionStore, SseSender};
use crate::types::protocol::Implementation;

/// In-memory session store using DashMap.
///
/// Ages sessions with `Instant`, so wall-clock jumps cannot expire a
/// session early.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionStore {
    /// Create a new in-memory session store.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Create a new store wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl SessionStore for InMemorySessionStore {
    fn get_or_create(&self, id_hint: Option<&str>) -> String {
        match id_hint {
            Some(hint) => {
                let id = hint.to_string();
                let is_new = !self.sessions.contains_key(&id);

                self.sessions
                    .entry(id.clone())
                    .or_insert_with(|| Session::new(hint.to_string()));

                if is_new {
                    tracing::info!(session_id = %id, "Created session");
                } else {
                    tracing::debug!(session_id = %id, "Resumed session");
                }

                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                self.sessions.insert(id.clone(), Session::new(id.clone()));
                tracing::info!(session_id = %id, "Created session with generated ID");
                id
            }
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    fn touch(&self, id: &str) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.touch();
        }
    }

    fn set_initialized(&self, id: &str, client_info: Implementation) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            tracing::info!(
                session_id = %id,
                client_name = %client_info.name,
                client_version = %client_info.version,
                "Session initialized"
            );
            session.set_initialized(client_info);
        }
    }

    fn push_outbound(&self, id: &str, frame: String) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.outbox.push(frame);
        }
    }

    fn drain_outbound(&self, id: &str) -> Vec<String> {
        self.sessions
            .get_mut(id)
            .map(|mut session| std::mem::take(&mut session.outbox))
            .unwrap_or_default()
    }

    fn register_sse(&self, id: &str, tx: SseSender) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.tx = Some(tx);
            session.touch();
            tracing::info!(session_id = %id, "Registered SSE connection");
        }
    }

    fn sse_sender(&self, id: &str) -> Option<SseSender> {
        self.sessions
            .get(id)
            .and_then(|session| session.tx.clone())
            .filter(|tx| !tx.is_closed())
    }

    fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    fn cleanup(&self, max_idle: Duration) -> usize {
        let mut to_remove = Vec::new();

        for entry in self.sessions.iter() {
            if entry.value().idle_duration() > max_idle {
                to_remove.push(entry.key().clone());
            }
        }

        let removed = to_remove.len();
        for id in to_remove {
            if self.sessions.remove(&id).is_some() {
                tracing::info!(session_id = %id, "Removed stale session");
            }
        }

        removed
    }

    fn remove(&self, id: &str) {
        if self.sessions.remove(id).is_some() {
            tracing::info!(session_id = %id, "Session removed");
        }
    }

    fn stats(&self) -> SessionStats {
        let mut connected = 0;
        let mut disconnected = 0;

        for entry in self.sessions.iter() {
            if entry.value().is_connected() {
                connected += 1;
            } else {
                disconnected += 1;
            }
        }

        SessionStats {
            total: self.sessions.len(),
            connected,
            disconnected,
        }
    }
}

/// Spawn a background task that periodically cleans up stale sessions.
pub fn spawn_cleanup_task(
    store: Arc<dyn SessionStore>,
    interval: Duration,
    max_idle: Duration,
    cancel: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Session cleanup task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    store.cleanup(max_idle);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation() {
        let store = InMemorySessionStore::new();
        let id = store.get_or_create(None);
        assert!(!id.is_empty());
        assert!(store.contains(&id));
        assert_eq!(store.stats().total, 1);
    }

    #[test]
    fn test_session_with_hint() {
        let store = InMemorySessionStore::new();
        let id = store.get_or_create(Some("my-session-id"));
        assert_eq!(id, "my-session-id");

        // Getting with same hint should return same session
        let id2 = store.get_or_create(Some("my-session-id"));
        assert_eq!(id2, "my-session-id");
        assert_eq!(store.stats().total, 1);
    }

    #[test]
    fn test_outbox_push_and_drain() {
        let store = InMemorySessionStore::new();
        let id = store.get_or_create(None);

        store.push_outbound(&id, "frame-1".to_string());
        store.push_outbound(&id, "frame-2".to_string());

        let drained = store.drain_outbound(&id);
        assert_eq!(drained, vec!["frame-1", "frame-2"]);
        assert!(store.drain_outbound(&id).is_empty());
    }

    #[test]
    fn test_cleanup_removes_old_sessions() {
        let store = InMemorySessionStore::new();
        let _id = store.get_or_create(None);

        // Immediate cleanup with 0 TTL should remove the session
        let removed = store.cleanup(Duration::ZERO);
        assert_eq!(removed, 1);
        assert_eq!(store.stats().total, 0);
    }

    #[test]
    fn test_cleanup_keeps_recent_sessions() {
        let store = InMemorySessionStore::new();
        let _id = store.get_or_create(None);

        let removed = store.cleanup(Duration::from_secs(3600));
        assert_eq!(removed, 0);
        assert_eq!(store.stats().total, 1);
    }
}
