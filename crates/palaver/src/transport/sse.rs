//! SSE Transport (legacy)
//!
//! The original HTTP pair: `GET /sse` opens a long-lived channel carrying
//! `event: message` frames outbound; `POST /message` carries inbound
//! documents, correlated to a session by the `sessionId` query parameter
//! or the `Mcp-Session-Id` header. Replies travel back over the SSE
//! channel, not the POST response.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Router,
};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use super::{Transport, TransportError, TransportState};
use crate::session::{InMemorySessionStore, SessionStore};
use crate::types::jsonrpc::RequestId;

struct Shared {
    inbound_tx: mpsc::UnboundedSender<String>,
    // Maps in-flight request ids to the session that sent them so replies
    // find their way back to the right SSE channel.
    request_sessions: DashMap<RequestId, String>,
    sessions: Arc<dyn SessionStore>,
}

/// Legacy SSE server transport.
pub struct SseTransport {
    state: TransportState,
    inbound: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
}

impl SseTransport {
    /// Create the transport and the axum Router serving `GET /sse` and
    /// `POST /message`.
    pub fn new(sessions: Arc<dyn SessionStore>) -> (Self, Router) {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            inbound_tx,
            request_sessions: DashMap::new(),
            sessions,
        });

        let router = Router::new()
            .route("/sse", axum::routing::get(sse_handler))
            .route("/message", axum::routing::post(message_handler))
            .with_state(shared.clone());

        (
            Self {
                state: TransportState::Disconnected,
                inbound,
                shared,
            },
            router,
        )
    }

    /// Create over a fresh in-memory session store.
    pub fn in_memory() -> (Self, Router) {
        Self::new(Arc::new(InMemorySessionStore::new()))
    }

    async fn deliver(&self, session_id: &str, frame: &str) {
        match self.shared.sessions.sse_sender(session_id) {
            Some(tx) => {
                let event = Event::default().event("message").data(frame);
                if tx.send(Ok(event)).await.is_err() {
                    self.shared
                        .sessions
                        .push_outbound(session_id, frame.to_string());
                }
            }
            None => {
                self.shared
                    .sessions
                    .push_outbound(session_id, frame.to_string());
            }
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.state = TransportState::Connected;
        Ok(())
    }

    fn state(&self) -> TransportState {
        self.state
    }

    async fn receive(&mut self) -> Result<Option<String>, TransportError> {
        if self.state != TransportState::Connected {
            return Err(TransportError::Closed);
        }
        match self.inbound.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.state = TransportState::Closed;
                Err(TransportError::Closed)
            }
        }
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        if self.state != TransportState::Connected {
            return Err(TransportError::Closed);
        }

        // A reply goes to the session that sent the matching request.
        if let Some(id) = reply_id(frame) {
            if let Some((_, session_id)) = self.shared.request_sessions.remove(&id) {
                self.deliver(&session_id, frame).await;
                return Ok(());
            }
        }

        // Everything else fans out to all sessions.
        for session_id in self.shared.sessions.session_ids() {
            self.deliver(&session_id, frame).await;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state = TransportState::Closed;
        Ok(())
    }
}

/// Id carried by a reply frame (single or first-of-batch).
fn reply_id(frame: &str) -> Option<RequestId> {
    let value: Value = serde_json::from_str(frame).ok()?;
    let first = match &value {
        Value::Array(items) => items.first()?,
        single => single,
    };
    if first.get("result").is_none() && first.get("error").is_none() {
        return None;
    }
    serde_json::from_value(first.get("id")?.clone()).ok()
}

/// Ids of all request entries in an inbound document.
fn request_ids(value: &Value) -> Vec<RequestId> {
    let entries: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };

    entries
        .into_iter()
        .filter_map(|entry| {
            let method = entry.get("method").and_then(|m| m.as_str())?;
            if method.starts_with("notifications/") {
                return None;
            }
            serde_json::from_value(entry.get("id")?.clone()).ok()
        })
        .collect()
}

/// Query parameters for the SSE endpoints.
#[derive(Debug, Deserialize)]
struct SseParams {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

fn session_hint(params: &SseParams, headers: &HeaderMap) -> Option<String> {
    params.session_id.clone().or_else(|| {
        headers
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    })
}

#[tracing::instrument(skip(shared, headers), fields(session_id = tracing::field::Empty))]
async fn sse_handler(
    State(shared): State<Arc<Shared>>,
    Query(params): Query<SseParams>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = shared
        .sessions
        .get_or_create(session_hint(&params, &headers).as_deref());
    tracing::Span::current().record("session_id", session_id.as_str());

    let (tx, rx) = mpsc::channel::<Result<Event, axum::Error>>(32);
    shared.sessions.register_sse(&session_id, tx.clone());

    // Tell the client where to POST its messages.
    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/message?sessionId={}", session_id));
    if tx.send(Ok(endpoint)).await.is_err() {
        tracing::warn!("Failed to send initial endpoint event");
    }

    // Frames queued while disconnected flush first.
    for frame in shared.sessions.drain_outbound(&session_id) {
        let event = Event::default().event("message").data(frame);
        if tx.send(Ok(event)).await.is_err() {
            break;
        }
    }

    tracing::info!(session_id = %session_id, "SSE connection established");

    let stream = ReceiverStream::new(rx).map(|result| match result {
        Ok(event) => Ok(event),
        Err(_) => Ok(Event::default().data("error")),
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    )
}

#[tracing::instrument(skip(shared, headers, body), fields(session_id = tracing::field::Empty))]
async fn message_handler(
    State(shared): State<Arc<Shared>>,
    Query(params): Query<SseParams>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let session_id = shared
        .sessions
        .get_or_create(session_hint(&params, &headers).as_deref());
    tracing::Span::current().record("session_id", session_id.as_str());
    shared.sessions.touch(&session_id);

    let value: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, "invalid JSON").into_response();
        }
    };

    for id in request_ids(&value) {
        shared.request_sessions.insert(id, session_id.clone());
    }

    if shared.inbound_tx.send(body).is_err() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    // Replies arrive over the SSE channel.
    StatusCode::ACCEPTED.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_id_extraction() {
        assert_eq!(
            reply_id(r#"{"jsonrpc":"2.0","id":4,"result":{}}"#),
            Some(RequestId::Number(4))
        );
        assert_eq!(
            reply_id(r#"{"jsonrpc":"2.0","id":4,"method":"ping","params":{}}"#),
            None
        );
    }

    #[test]
    fn test_request_ids_from_batch() {
        let value: Value = serde_json::from_str(
            r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","method":"notifications/initialized"},{"jsonrpc":"2.0","id":2,"method":"ping"}]"#,
        )
        .unwrap();
        assert_eq!(
            request_ids(&value),
            vec![RequestId::Number(1), RequestId::Number(2)]
        );
    }

    #[tokio::test]
    async fn test_reply_routed_to_originating_session() {
        let (mut transport, _router) = SseTransport::in_memory();
        transport.connect().await.unwrap();

        let sessions = transport.shared.sessions.clone();
        let session_id = sessions.get_or_create(Some("s-sse"));
        transport
            .shared
            .request_sessions
            .insert(RequestId::Number(11), session_id.clone());

        transport
            .send(r#"{"jsonrpc":"2.0","id":11,"result":{}}"#)
            .await
            .unwrap();

        // No SSE channel connected, so the reply landed in the outbox.
        let queued = sessions.drain_outbound(&session_id);
        assert_eq!(queued.len(), 1);
        assert!(transport.shared.request_sessions.is_empty());
    }
}
