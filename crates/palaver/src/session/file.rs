//! File-Backed Session Store
//!
//! One JSON document per session under a root directory:
//! `{ "lastSeen": <unix-seconds>, "pending": ["<frame>", ...] }`.
//!
//! TTL is enforced on read: an expired file is evicted and the session
//! treated as absent. Live SSE channels are runtime state and stay in
//! memory beside the files.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use super::{SessionStats, SessionStore, SseSender};
use crate::types::protocol::Implementation;

#[derive(Debug, Serialize, Deserialize, Default)]
struct SessionRecord {
    #[serde(rename = "lastSeen")]
    last_seen: u64,
    #[serde(default)]
    pending: Vec<String>,
}

/// Session store persisting one file per session.
#[derive(Debug)]
pub struct FileSessionStore {
    root: PathBuf,
    ttl: Duration,
    channels: DashMap<String, SseSender>,
}

impl FileSessionStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            ttl,
            channels: DashMap::new(),
        })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        // Session ids land in filenames; anything outside a conservative
        // character set is replaced so a crafted id cannot escape the root.
        let safe: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{}.json", safe))
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Idle seconds for a record, clamping a future lastSeen (clock stepped
    /// backwards between writes) to zero rather than a negative age.
    fn idle_secs(record: &SessionRecord) -> u64 {
        Self::now_secs().saturating_sub(record.last_seen)
    }

    fn read_live(&self, path: &Path) -> Option<SessionRecord> {
        let bytes = std::fs::read(path).ok()?;
        let record: SessionRecord = serde_json::from_slice(&bytes).ok()?;

        if Self::idle_secs(&record) > self.ttl.as_secs() {
            // Expired on read: evict the file and report absent.
            let _ = std::fs::remove_file(path);
            return None;
        }
        Some(record)
    }

    fn write(&self, path: &Path, record: &SessionRecord) {
        match serde_json::to_vec(record) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(path, bytes) {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to write session file");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize session record"),
        }
    }

    fn update<F>(&self, id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut SessionRecord),
    {
        let path = self.path_for(id);
        match self.read_live(&path) {
            Some(mut record) => {
                mutate(&mut record);
                self.write(&path, &record);
                true
            }
            None => false,
        }
    }
}

impl SessionStore for FileSessionStore {
    fn get_or_create(&self, id_hint: Option<&str>) -> String {
        let id = match id_hint {
            Some(hint) => hint.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        let path = self.path_for(&id);
        if self.read_live(&path).is_none() {
            let record = SessionRecord {
                last_seen: Self::now_secs(),
                pending: Vec::new(),
            };
            self.write(&path, &record);
            tracing::info!(session_id = %id, "Created session file");
        }
        id
    }

    fn contains(&self, id: &str) -> bool {
        self.read_live(&self.path_for(id)).is_some()
    }

    fn touch(&self, id: &str) {
        self.update(id, |record| {
            // Monotonic lastSeen: a concurrent writer may have stamped a
            // later time already.
            record.last_seen = record.last_seen.max(Self::now_secs());
        });
    }

    fn set_initialized(&self, id: &str, client_info: Implementation) {
        tracing::info!(
            session_id = %id,
            client_name = %client_info.name,
            "Session initialized"
        );
        self.touch(id);
    }

    fn push_outbound(&self, id: &str, frame: String) {
        self.update(id, |record| record.pending.push(frame));
    }

    fn drain_outbound(&self, id: &str) -> Vec<String> {
        let path = self.path_for(id);
        match self.read_live(&path) {
            Some(mut record) => {
                let drained = std::mem::take(&mut record.pending);
                self.write(&path, &record);
                drained
            }
            None => Vec::new(),
        }
    }

    fn register_sse(&self, id: &str, tx: SseSender) {
        self.channels.insert(id.to_string(), tx);
        self.touch(id);
    }

    fn sse_sender(&self, id: &str) -> Option<SseSender> {
        self.channels
            .get(id)
            .map(|tx| tx.clone())
            .filter(|tx| !tx.is_closed())
    }

    fn session_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return ids,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if self.read_live(&path).is_some() {
                    ids.push(stem.to_string());
                }
            }
        }
        ids
    }

    fn cleanup(&self, max_idle: Duration) -> usize {
        let mut removed = 0;
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let expired = match std::fs::read(&path)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<SessionRecord>(&bytes).ok())
            {
                Some(record) => Self::idle_secs(&record) > max_idle.as_secs(),
                // Unreadable session files are garbage; collect them too.
                None => true,
            };

            if expired && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Session file cleanup completed");
        }
        removed
    }

    fn remove(&self, id: &str) {
        self.channels.remove(id);
        let _ = std::fs::remove_file(self.path_for(id));
    }

    fn stats(&self) -> SessionStats {
        let ids = self.session_ids();
        let connected = ids.iter().filter(|id| self.sse_sender(id).is_some()).count();
        SessionStats {
            total: ids.len(),
            connected,
            disconnected: ids.len() - connected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_ttl(ttl: Duration) -> (tempfile::TempDir, FileSessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path(), ttl).unwrap();
        (dir, store)
    }

    #[test]
    fn test_create_and_contains() {
        let (_dir, store) = store_with_ttl(Duration::from_secs(60));
        let id = store.get_or_create(Some("abc"));
        assert_eq!(id, "abc");
        assert!(store.contains("abc"));
        assert!(!store.contains("missing"));
    }

    #[test]
    fn test_pending_roundtrip() {
        let (_dir, store) = store_with_ttl(Duration::from_secs(60));
        let id = store.get_or_create(None);

        store.push_outbound(&id, "one".to_string());
        store.push_outbound(&id, "two".to_string());
        assert_eq!(store.drain_outbound(&id), vec!["one", "two"]);
        assert!(store.drain_outbound(&id).is_empty());
    }

    #[test]
    fn test_ttl_enforced_on_read() {
        let (_dir, store) = store_with_ttl(Duration::ZERO);
        let id = store.get_or_create(Some("ephemeral"));

        // Zero TTL: any record older than zero seconds is expired. Backdate
        // the file so the age is unambiguous.
        let path = store.path_for(&id);
        let record = SessionRecord {
            last_seen: FileSessionStore::now_secs() - 10,
            pending: vec![],
        };
        store.write(&path, &record);

        assert!(!store.contains(&id));
        assert!(!path.exists());
    }

    #[test]
    fn test_future_last_seen_treated_as_fresh() {
        let (_dir, store) = store_with_ttl(Duration::from_secs(1));
        let id = store.get_or_create(Some("skewed"));

        let path = store.path_for(&id);
        let record = SessionRecord {
            last_seen: FileSessionStore::now_secs() + 1000,
            pending: vec![],
        };
        store.write(&path, &record);

        // A lastSeen in the future must not be treated as expired.
        assert!(store.contains(&id));
    }

    #[test]
    fn test_hostile_id_stays_in_root() {
        let (dir, store) = store_with_ttl(Duration::from_secs(60));
        let id = store.get_or_create(Some("../../etc/passwd"));

        for entry in std::fs::read_dir(dir.path()).unwrap().flatten() {
            assert_eq!(entry.path().parent().unwrap(), dir.path());
        }
        assert!(store.contains(&id));
    }
}
