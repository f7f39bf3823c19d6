//! MCP Client
//!
//! Transport-generic client: performs the initialize handshake, lists
//! capabilities with cursor pagination, calls tools, and reads resources.
//! Request correlation and timeouts run through the pending bag, so every
//! request fires exactly one terminal event - the reply or a synthetic
//! timeout (-32001).

use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::codec;
use crate::pending::{PendingBag, TerminalEvent};
use crate::transport::{Transport, TransportError};
use crate::types::content::Content;
use crate::types::error::ErrorData;
use crate::types::jsonrpc::{Message, Notification, Request, RequestId, Response};
use crate::types::prompt::Prompt;
use crate::types::protocol::{Implementation, InitializeResult, PROTOCOL_VERSION};
use crate::types::resource::{ReadResourceResult, Resource, ResourceTemplate};
use crate::types::tool::Tool;

/// Errors that can occur when using the MCP client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Operation attempted before the initialize handshake completed.
    #[error("client is not initialized")]
    NotInitialized,

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The peer sent something the protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer answered with a JSON-RPC error (includes -32001 timeouts).
    #[error("rpc error: {0}")]
    Rpc(ErrorData),
}

/// Options for configuring the MCP client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Client name for initialization.
    pub client_name: String,
    /// Client version for initialization.
    pub client_version: String,
    /// How long to wait for a reply before timing out.
    pub request_ttl: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            client_name: "palaver-client".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            request_ttl: crate::pending::DEFAULT_TTL,
        }
    }
}

/// MCP client over any transport.
pub struct McpClient<T: Transport> {
    transport: T,
    pending: PendingBag,
    options: ClientOptions,
    next_id: i64,
    server: Option<InitializeResult>,
}

impl<T: Transport> McpClient<T> {
    /// Create a client over a connected-or-connectable transport.
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, ClientOptions::default())
    }

    /// Create a client with custom options.
    pub fn with_options(transport: T, options: ClientOptions) -> Self {
        Self {
            transport,
            pending: PendingBag::with_ttl(options.request_ttl),
            options,
            next_id: 0,
            server: None,
        }
    }

    /// Server info from the handshake, once initialized.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server.as_ref()
    }

    fn next_id(&mut self) -> RequestId {
        self.next_id += 1;
        RequestId::Number(self.next_id)
    }

    /// Perform the MCP handshake.
    ///
    /// Sends `initialize`, then `notifications/initialized`. Every other
    /// operation fails with `NotInitialized` until this completes.
    pub async fn initialize(&mut self) -> Result<InitializeResult, ClientError> {
        self.transport.connect().await?;

        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": Implementation::new(
                &self.options.client_name,
                &self.options.client_version,
            ),
        });

        let result = self.round_trip("initialize", params).await?;
        let result: InitializeResult = serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("Invalid initialize result: {}", e)))?;

        let notification = codec::encode(&Message::Notification(Notification::new(
            "notifications/initialized",
        )));
        self.transport.send(&notification).await?;

        tracing::info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            "MCP session initialized"
        );

        self.server = Some(result.clone());
        Ok(result)
    }

    /// List all tools, following cursors until exhausted.
    pub async fn list_tools(&mut self) -> Result<Vec<Tool>, ClientError> {
        self.list_pages("tools/list", "tools").await
    }

    /// List all prompts.
    pub async fn list_prompts(&mut self) -> Result<Vec<Prompt>, ClientError> {
        self.list_pages("prompts/list", "prompts").await
    }

    /// List all resources.
    pub async fn list_resources(&mut self) -> Result<Vec<Resource>, ClientError> {
        self.list_pages("resources/list", "resources").await
    }

    /// List all resource templates.
    pub async fn list_resource_templates(
        &mut self,
    ) -> Result<Vec<ResourceTemplate>, ClientError> {
        self.list_pages("resources/templates/list", "resourceTemplates")
            .await
    }

    /// Call a tool and return its content blocks.
    ///
    /// `arguments` always serializes as an object - an empty one when no
    /// arguments are given, never a missing field.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<Vec<Content>, ClientError> {
        self.ensure_initialized()?;

        let params = serde_json::json!({
            "name": name,
            "arguments": Value::Object(arguments.unwrap_or_default()),
        });

        let result = self.round_trip("tools/call", params).await?;
        let content = result
            .get("content")
            .cloned()
            .ok_or_else(|| ClientError::Protocol("Missing content in tool result".into()))?;

        serde_json::from_value(content)
            .map_err(|e| ClientError::Protocol(format!("Invalid tool content: {}", e)))
    }

    /// Read a resource by uri.
    pub async fn read_resource(&mut self, uri: &str) -> Result<ReadResourceResult, ClientError> {
        self.ensure_initialized()?;

        let result = self
            .round_trip("resources/read", serde_json::json!({ "uri": uri }))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("Invalid read result: {}", e)))
    }

    /// Send a ping and wait for the empty reply.
    pub async fn ping(&mut self) -> Result<(), ClientError> {
        self.ensure_initialized()?;
        self.round_trip("ping", serde_json::json!({})).await?;
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<(), ClientError> {
        if self.server.is_none() {
            return Err(ClientError::NotInitialized);
        }
        Ok(())
    }

    async fn list_pages<D: serde::de::DeserializeOwned>(
        &mut self,
        method: &str,
        items_key: &str,
    ) -> Result<Vec<D>, ClientError> {
        self.ensure_initialized()?;

        let mut all = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(cursor) => serde_json::json!({ "cursor": cursor }),
                None => serde_json::json!({}),
            };

            let result = self.round_trip(method, params).await?;
            let items = result
                .get(items_key)
                .cloned()
                .ok_or_else(|| {
                    ClientError::Protocol(format!("Missing {} in {} result", items_key, method))
                })?;
            let items: Vec<D> = serde_json::from_value(items)
                .map_err(|e| ClientError::Protocol(format!("Invalid {} page: {}", method, e)))?;
            all.extend(items);

            match result.get("nextCursor").and_then(|c| c.as_str()) {
                Some(next) if !next.is_empty() => cursor = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(all)
    }

    /// Send one request and wait for its terminal event.
    async fn round_trip(&mut self, method: &str, params: Value) -> Result<Value, ClientError> {
        let id = self.next_id();

        let slot: Arc<Mutex<Option<TerminalEvent>>> = Arc::new(Mutex::new(None));
        let writer = slot.clone();
        self.pending.track(
            id.clone(),
            Box::new(move |event| {
                *writer.lock().unwrap_or_else(|e| e.into_inner()) = Some(event);
            }),
        );

        let frame = codec::encode(&Message::Request(Request::with_params(
            id,
            method,
            params,
        )));
        self.transport.send(&frame).await?;

        loop {
            if let Some(event) = slot.lock().unwrap_or_else(|e| e.into_inner()).take() {
                return event.map_err(ClientError::Rpc);
            }

            match self.transport.receive().await {
                Ok(Some(frame)) => self.handle_inbound(&frame).await?,
                Ok(None) => {
                    self.pending.gc();
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                Err(e) => return Err(ClientError::Transport(e)),
            }
        }
    }

    /// Handle a frame that arrived while waiting for a reply.
    async fn handle_inbound(&mut self, frame: &str) -> Result<(), ClientError> {
        for entry in codec::parse(frame) {
            match entry {
                Ok(reply @ (Message::Response(_) | Message::Error(_))) => {
                    if !self.pending.resolve(&reply) {
                        tracing::debug!(id = ?reply.id(), "Reply matched no pending request");
                    }
                }
                Ok(Message::Request(request)) => {
                    // Server-initiated requests: answer pings, reject the rest.
                    let reply = if request.method == "ping" {
                        Message::Response(Response::success(request.id, serde_json::json!({})))
                    } else {
                        Message::Error(crate::types::jsonrpc::ErrorResponse::new(
                            request.id,
                            ErrorData::method_not_found(&request.method),
                        ))
                    };
                    self.transport.send(&codec::encode(&reply)).await?;
                }
                Ok(Message::Notification(notification)) => {
                    tracing::debug!(method = %notification.method, "Server notification");
                }
                Err(error) => {
                    tracing::warn!(code = error.code, "Unparseable inbound frame");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportState;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Transport that answers requests from a scripted table.
    struct FakeServerTransport {
        state: TransportState,
        inbound: VecDeque<String>,
        sent: Vec<String>,
        respond: fn(&Request) -> Option<Message>,
    }

    impl FakeServerTransport {
        fn new(respond: fn(&Request) -> Option<Message>) -> Self {
            Self {
                state: TransportState::Disconnected,
                inbound: VecDeque::new(),
                sent: Vec::new(),
                respond,
            }
        }
    }

    #[async_trait]
    impl Transport for FakeServerTransport {
        async fn connect(&mut self) -> Result<(), TransportError> {
            self.state = TransportState::Connected;
            Ok(())
        }

        fn state(&self) -> TransportState {
            self.state
        }

        async fn receive(&mut self) -> Result<Option<String>, TransportError> {
            Ok(self.inbound.pop_front())
        }

        async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
            self.sent.push(frame.to_string());
            for entry in codec::parse(frame) {
                if let Ok(Message::Request(request)) = entry {
                    if let Some(reply) = (self.respond)(&request) {
                        self.inbound.push_back(codec::encode(&reply));
                    }
                }
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.state = TransportState::Closed;
            Ok(())
        }
    }

    fn initialize_reply(request: &Request) -> Message {
        Message::Response(Response::success(
            request.id.clone(),
            serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "fake-server", "version": "0.0.1" }
            }),
        ))
    }

    #[tokio::test]
    async fn test_operations_rejected_before_initialize() {
        let transport = FakeServerTransport::new(|_| None);
        let mut client = McpClient::new(transport);

        let err = client.list_tools().await.unwrap_err();
        assert!(matches!(err, ClientError::NotInitialized));

        let err = client.call_tool("echo", None).await.unwrap_err();
        assert!(matches!(err, ClientError::NotInitialized));
    }

    #[tokio::test]
    async fn test_initialize_handshake() {
        let transport = FakeServerTransport::new(|request| match request.method.as_str() {
            "initialize" => Some(initialize_reply(request)),
            _ => None,
        });

        let mut client = McpClient::new(transport);
        let result = client.initialize().await.unwrap();
        assert_eq!(result.server_info.name, "fake-server");

        // The initialized notification followed the handshake.
        assert!(client
            .transport
            .sent
            .iter()
            .any(|f| f.contains("notifications/initialized")));
    }

    #[tokio::test]
    async fn test_list_tools_follows_cursors() {
        let transport = FakeServerTransport::new(|request| match request.method.as_str() {
            "initialize" => Some(initialize_reply(request)),
            "tools/list" => {
                let cursor = request
                    .params
                    .get("cursor")
                    .and_then(|c| c.as_str())
                    .map(String::from);
                let result = match cursor.as_deref() {
                    None => serde_json::json!({
                        "tools": [
                            {"name": "alpha", "description": "a", "inputSchema": {"type": "object"}},
                            {"name": "beta", "description": "b", "inputSchema": {"type": "object"}}
                        ],
                        "nextCursor": "page-2"
                    }),
                    Some("page-2") => serde_json::json!({
                        "tools": [
                            {"name": "gamma", "description": "c", "inputSchema": {"type": "object"}}
                        ]
                    }),
                    Some(other) => panic!("unexpected cursor {}", other),
                };
                Some(Message::Response(Response::success(
                    request.id.clone(),
                    result,
                )))
            }
            _ => None,
        });

        let mut client = McpClient::new(transport);
        client.initialize().await.unwrap();

        let tools = client.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn test_call_tool_sends_empty_arguments_object() {
        let transport = FakeServerTransport::new(|request| match request.method.as_str() {
            "initialize" => Some(initialize_reply(request)),
            "tools/call" => {
                // The arguments field must be present and an object.
                assert!(request.params["arguments"].is_object());
                Some(Message::Response(Response::success(
                    request.id.clone(),
                    serde_json::json!({
                        "content": [{"type": "text", "text": "ok"}]
                    }),
                )))
            }
            _ => None,
        });

        let mut client = McpClient::new(transport);
        client.initialize().await.unwrap();

        let content = client.call_tool("echo", None).await.unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0].as_text(), Some("ok"));
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out_once() {
        // A server that never answers: the pending bag must deliver exactly
        // one -32001 terminal event per request.
        let transport = FakeServerTransport::new(|_| None);

        let mut client = McpClient::with_options(
            transport,
            ClientOptions {
                request_ttl: Duration::ZERO,
                ..Default::default()
            },
        );

        // Zero TTL also times out initialize itself; that is the point.
        let err = client.initialize().await.unwrap_err();
        match err {
            ClientError::Rpc(error) => assert_eq!(error.code, ErrorData::REQUEST_TIMEOUT),
            other => panic!("expected rpc timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rpc_error_surfaces() {
        let transport = FakeServerTransport::new(|request| match request.method.as_str() {
            "initialize" => Some(initialize_reply(request)),
            "tools/call" => Some(Message::Error(crate::types::jsonrpc::ErrorResponse::new(
                request.id.clone(),
                ErrorData::tool_not_found("ghost"),
            ))),
            _ => None,
        });

        let mut client = McpClient::new(transport);
        client.initialize().await.unwrap();

        let err = client.call_tool("ghost", None).await.unwrap_err();
        match err {
            ClientError::Rpc(error) => assert_eq!(error.code, ErrorData::METHOD_NOT_FOUND),
            other => panic!("expected rpc error, got {:?}", other),
        }
    }
}
