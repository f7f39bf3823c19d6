//! Streamable HTTP Transport
//!
//! - `POST /_mcp` - one JSON-RPC document in, one out
//! - `GET /_mcp` (Accept: text/event-stream) - server push channel
//! - `DELETE /_mcp` - session termination
//! - Session ID via `Mcp-Session-Id` header; the server issues one on
//!   first contact
//!
//! Construction yields the transport plus an axum Router. The POST
//! handler parks a reply slot keyed by request id and enqueues the frame
//! for the server loop; `send` fulfils the slot when the outgoing frame
//! matches, otherwise the frame goes to the session's SSE channel or
//! outbox.

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Router,
};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::Stream;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use super::{Transport, TransportError, TransportState};
use crate::session::{InMemorySessionStore, SessionStore};
use crate::types::error::ErrorData;
use crate::types::jsonrpc::RequestId;

const SESSION_HEADER: &str = "mcp-session-id";

/// Streamable HTTP transport configuration.
#[derive(Clone)]
pub struct StreamableHttpConfig {
    /// Session storage backend.
    pub sessions: Arc<dyn SessionStore>,
    /// Idle TTL before a session is evicted.
    pub session_ttl: Duration,
    /// How long a POST waits for the server loop to produce the reply.
    pub reply_timeout: Duration,
    /// Optional bearer token required on every call.
    pub bearer_token: Option<String>,
    /// Resource metadata URL advertised on auth failures.
    pub resource_metadata: String,
}

impl Default for StreamableHttpConfig {
    fn default() -> Self {
        Self {
            sessions: Arc::new(InMemorySessionStore::new()),
            session_ttl: Duration::from_secs(1800),
            reply_timeout: Duration::from_secs(30),
            bearer_token: None,
            resource_metadata: "/.well-known/oauth-protected-resource".to_string(),
        }
    }
}

struct Shared {
    inbound_tx: mpsc::UnboundedSender<String>,
    reply_slots: DashMap<RequestId, oneshot::Sender<String>>,
    sessions: Arc<dyn SessionStore>,
    config: StreamableHttpConfig,
    closed: AtomicBool,
}

/// Streamable HTTP server transport.
pub struct StreamableHttpTransport {
    state: TransportState,
    inbound: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
}

impl StreamableHttpTransport {
    /// Create the transport and the axum Router serving it at `/_mcp`.
    pub fn new(config: StreamableHttpConfig) -> (Self, Router) {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            inbound_tx,
            reply_slots: DashMap::new(),
            sessions: config.sessions.clone(),
            config,
            closed: AtomicBool::new(false),
        });

        let router = Router::new()
            .route(
                "/_mcp",
                axum::routing::post(post_handler)
                    .get(sse_handler)
                    .delete(delete_handler)
                    .options(preflight_handler),
            )
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

    /// Dispatch an outbound frame that matched no parked POST: deliver to
    /// every live SSE channel, queue in the outbox otherwise.
    async fn push_to_sessions(&self, frame: &str) {
        for session_id in self.shared.sessions.session_ids() {
            match self.shared.sessions.sse_sender(&session_id) {
                Some(tx) => {
                    let event = Event::default().event("message").data(frame);
                    if tx.send(Ok(event)).await.is_err() {
                        self.shared
                            .sessions
                            .push_outbound(&session_id, frame.to_string());
                    }
                }
                None => {
                    self.shared
                        .sessions
                        .push_outbound(&session_id, frame.to_string());
                }
            }
        }
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
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

        // A reply frame goes back to the POST that carried its request;
        // batch replies correlate on their first entry.
        if let Some(id) = correlation_id(frame) {
            if let Some((_, slot)) = self.shared.reply_slots.remove(&id) {
                if slot.send(frame.to_string()).is_err() {
                    tracing::debug!(request_id = %id, "POST waiter went away, dropping reply");
                }
                return Ok(());
            }
        }

        // Server-initiated requests and notifications fan out to sessions.
        self.push_to_sessions(frame).await;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state = TransportState::Closed;
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Correlation id of a frame: the id of a single reply, or of the first
/// entry in a batch reply.
fn correlation_id(frame: &str) -> Option<RequestId> {
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

fn apply_common_headers(response: &mut Response, session_id: Option<&str>) {
    let headers = response.headers_mut();
    headers.insert(
        "access-control-allow-origin",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type, mcp-session-id, authorization"),
    );
    headers.insert(
        "access-control-expose-headers",
        HeaderValue::from_static("mcp-session-id"),
    );
    if let Some(id) = session_id {
        if let Ok(value) = HeaderValue::from_str(id) {
            headers.insert(SESSION_HEADER, value);
        }
    }
}

fn respond(status: StatusCode, session_id: Option<&str>, body: Option<String>) -> Response {
    let mut response = match body {
        Some(body) => (status, [("content-type", "application/json")], body).into_response(),
        None => status.into_response(),
    };
    apply_common_headers(&mut response, session_id);
    response
}

/// Check the bearer token; failures carry the WWW-Authenticate challenge
/// pointing at the protected-resource metadata.
fn check_auth(shared: &Shared, headers: &HeaderMap) -> Result<(), Response> {
    let expected = match &shared.config.bearer_token {
        Some(token) => token,
        None => return Ok(()),
    };

    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let status = match presented {
        None => StatusCode::UNAUTHORIZED,
        Some(token) if token != expected => StatusCode::FORBIDDEN,
        Some(_) => return Ok(()),
    };

    let challenge = format!(
        "Bearer resource_metadata=\"{}\"",
        shared.config.resource_metadata
    );
    let mut response = respond(status, None, None);
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response.headers_mut().insert("www-authenticate", value);
    }
    Err(response)
}

fn session_hint(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[tracing::instrument(skip(shared, headers, body), fields(session_id = tracing::field::Empty))]
async fn post_handler(
    State(shared): State<Arc<Shared>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Err(denied) = check_auth(&shared, &headers) {
        return denied;
    }
    if shared.closed.load(Ordering::SeqCst) {
        return respond(StatusCode::SERVICE_UNAVAILABLE, None, None);
    }

    let session_id = shared.sessions.get_or_create(session_hint(&headers).as_deref());
    tracing::Span::current().record("session_id", session_id.as_str());
    shared.sessions.touch(&session_id);

    // Classify just enough to know whether a reply will come back.
    let value: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            let error = serde_json::json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": ErrorData::parse_error(format!("Invalid JSON: {}", e)),
            });
            return respond(
                StatusCode::BAD_REQUEST,
                Some(&session_id),
                Some(error.to_string()),
            );
        }
    };

    let wait_id = first_request_id(&value);

    let slot = match &wait_id {
        Some(id) => {
            let (tx, rx) = oneshot::channel();
            shared.reply_slots.insert(id.clone(), tx);
            Some((id.clone(), rx))
        }
        None => None,
    };

    if shared.inbound_tx.send(body).is_err() {
        if let Some((id, _)) = &slot {
            shared.reply_slots.remove(id);
        }
        return respond(StatusCode::SERVICE_UNAVAILABLE, Some(&session_id), None);
    }

    match slot {
        // Notifications and replies get no body back.
        None => respond(StatusCode::ACCEPTED, Some(&session_id), None),
        Some((id, rx)) => {
            match tokio::time::timeout(shared.config.reply_timeout, rx).await {
                Ok(Ok(frame)) => respond(StatusCode::OK, Some(&session_id), Some(frame)),
                _ => {
                    shared.reply_slots.remove(&id);
                    let error = serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": ErrorData::request_timeout(),
                    });
                    respond(
                        StatusCode::GATEWAY_TIMEOUT,
                        Some(&session_id),
                        Some(error.to_string()),
                    )
                }
            }
        }
    }
}

/// Id of the first request entry in a document, if any entry is a request.
fn first_request_id(value: &Value) -> Option<RequestId> {
    let entries: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };

    for entry in entries {
        let method = entry.get("method").and_then(|m| m.as_str());
        let has_id = entry.get("id").map(|id| !id.is_null()).unwrap_or(false);
        match method {
            Some(method) if method.starts_with("notifications/") => continue,
            Some(_) if has_id => {
                return serde_json::from_value(entry.get("id")?.clone()).ok();
            }
            _ => continue,
        }
    }
    None
}

#[tracing::instrument(skip(shared, headers), fields(session_id = tracing::field::Empty))]
async fn sse_handler(
    State(shared): State<Arc<Shared>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Response> {
    if let Err(denied) = check_auth(&shared, &headers) {
        return Err(denied);
    }

    let session_id = shared.sessions.get_or_create(session_hint(&headers).as_deref());
    tracing::Span::current().record("session_id", session_id.as_str());

    let (tx, rx) = mpsc::channel::<Result<Event, axum::Error>>(32);
    shared.sessions.register_sse(&session_id, tx.clone());

    // Frames queued while no channel was connected go out first.
    for frame in shared.sessions.drain_outbound(&session_id) {
        let event = Event::default().event("message").data(frame);
        if tx.send(Ok(event)).await.is_err() {
            break;
        }
    }

    tracing::info!(session_id = %session_id, "SSE channel established");

    let stream = ReceiverStream::new(rx).map(|result| match result {
        Ok(event) => Ok(event),
        Err(_) => Ok(Event::default().data("error")),
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    ))
}

#[tracing::instrument(skip(shared, headers))]
async fn delete_handler(State(shared): State<Arc<Shared>>, headers: HeaderMap) -> Response {
    if let Err(denied) = check_auth(&shared, &headers) {
        return denied;
    }

    match session_hint(&headers) {
        Some(session_id) => {
            shared.sessions.remove(&session_id);
            tracing::info!(session_id = %session_id, "Session terminated");
            respond(StatusCode::NO_CONTENT, None, None)
        }
        None => respond(StatusCode::BAD_REQUEST, None, None),
    }
}

async fn preflight_handler(State(_shared): State<Arc<Shared>>) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    apply_common_headers(&mut response, None);
    response
        .headers_mut()
        .insert(
            "access-control-allow-methods",
            HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
        );
    response
}
