//! Pending-Response Bag
//!
//! Correlates outbound requests with inbound replies and expires entries
//! whose deadline has passed. Each tracked request fires exactly one
//! terminal event: the matching response, the matching error, or a
//! synthetic timeout error (code -32001).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::error::ErrorData;
use crate::types::jsonrpc::{Message, RequestId};

/// Terminal event delivered to a pending request's callback.
pub type TerminalEvent = Result<serde_json::Value, ErrorData>;

/// Callback invoked exactly once when a pending request terminates.
pub type ResolveCallback = Box<dyn FnOnce(TerminalEvent) + Send>;

/// Default time-to-live for a pending request.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

struct PendingEntry {
    sent_at: Instant,
    on_resolve: ResolveCallback,
}

/// Bag of in-flight outbound requests.
///
/// Single-writer: owned by the connection loop that sends the requests.
/// An entry is removed before its callback runs, so a reply racing the
/// garbage collector signals at most once.
pub struct PendingBag {
    entries: HashMap<RequestId, PendingEntry>,
    ttl: Duration,
}

impl PendingBag {
    /// Create a bag with the default 30 second TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Create a bag with a custom TTL.
    ///
    /// A zero TTL expires every entry on the very next `gc`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Track an outbound request.
    pub fn track(&mut self, id: RequestId, on_resolve: ResolveCallback) {
        self.entries.insert(
            id,
            PendingEntry {
                sent_at: Instant::now(),
                on_resolve,
            },
        );
    }

    /// Try to resolve a pending request from an inbound reply.
    ///
    /// Returns true when the reply's id matched a tracked request. The id
    /// becomes reusable immediately after.
    pub fn resolve(&mut self, reply: &Message) -> bool {
        let (id, event) = match reply {
            Message::Response(response) => (response.id.clone(), Ok(response.result.clone())),
            Message::Error(error) => match &error.id {
                Some(id) => (id.clone(), Err(error.error.clone())),
                None => return false,
            },
            _ => return false,
        };

        match self.entries.remove(&id) {
            Some(entry) => {
                (entry.on_resolve)(event);
                true
            }
            None => false,
        }
    }

    /// Expire entries past the TTL, delivering a timeout error to each.
    ///
    /// Returns the expired request ids.
    pub fn gc(&mut self) -> Vec<RequestId> {
        let now = Instant::now();
        let expired: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.sent_at) >= self.ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(entry) = self.entries.remove(id) {
                tracing::warn!(request_id = %id, "Pending request timed out");
                (entry.on_resolve)(Err(ErrorData::request_timeout()));
            }
        }
        expired
    }

    /// Number of live pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PendingBag {
    fn default() -> Self {
        Self::new()
    }
}
