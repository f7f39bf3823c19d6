//! JSON-RPC Processor
//!
//! Routes inbound frames: requests to capability handlers, notifications
//! to listeners, replies into the pending bag. Produces zero or more
//! encoded outbound documents per frame.

use futures::stream::BoxStream;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument;

use crate::codec;
use crate::pending::PendingBag;
use crate::registry::{CapabilityRegistry, ToolBody};
use crate::types::error::ErrorData;
use crate::types::jsonrpc::{ErrorResponse, Message, Notification, Request, RequestId, Response};
use crate::types::prompt::{GetPromptParams, ListPromptsResult};
use crate::types::protocol::{
    Implementation, InitializeParams, InitializeResult, ServerCapabilities,
};
use crate::types::resource::{
    ListResourceTemplatesResult, ListResourcesResult, ReadResourceParams,
};
use crate::types::tool::{CallToolParams, ListToolsResult};
use crate::types::ListParams;

/// One outbound item produced by the processor.
pub enum Outbound {
    /// A complete encoded document, ready to send.
    Frame(String),
    /// A streamable response: one frame per item, all sharing `id`.
    Stream {
        id: RequestId,
        stream: BoxStream<'static, Value>,
    },
}

/// Listener invoked for every inbound notification.
pub type NotificationListener = Box<dyn Fn(&Notification) + Send + Sync>;

/// Per-connection JSON-RPC dispatcher.
pub struct JsonRpcProcessor {
    registry: Arc<CapabilityRegistry>,
    server_info: Implementation,
    instructions: Option<String>,
    notification_listeners: Vec<NotificationListener>,
}

impl JsonRpcProcessor {
    /// Create a processor serving the given registry.
    pub fn new(registry: Arc<CapabilityRegistry>, server_info: Implementation) -> Self {
        Self {
            registry,
            server_info,
            instructions: None,
            notification_listeners: Vec::new(),
        }
    }

    /// Set the instructions returned from initialize.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Register a listener for inbound notifications.
    pub fn on_notification(&mut self, listener: impl Fn(&Notification) + Send + Sync + 'static) {
        self.notification_listeners.push(Box::new(listener));
    }

    /// Process one inbound frame.
    ///
    /// Replies to a batch come back as a single batch document preserving
    /// request order, with notification entries omitted.
    pub async fn process(&self, frame: &str, pending: &mut PendingBag) -> Vec<Outbound> {
        let is_batch = frame.trim_start().starts_with('[');
        let parsed = codec::parse(frame);

        let mut replies: Vec<Message> = Vec::new();
        let mut streams: Vec<Outbound> = Vec::new();

        for entry in parsed {
            match entry {
                Err(error) => {
                    replies.push(Message::Error(ErrorResponse::without_id(error)));
                }
                Ok(Message::Request(request)) => {
                    match self.dispatch_request(&request).await {
                        Reply::Single(message) => replies.push(message),
                        Reply::Stream(stream) => {
                            streams.push(Outbound::Stream {
                                id: request.id.clone(),
                                stream,
                            });
                        }
                    }
                }
                Ok(Message::Notification(notification)) => {
                    self.handle_notification(&notification);
                }
                Ok(reply @ (Message::Response(_) | Message::Error(_))) => {
                    if !pending.resolve(&reply) {
                        tracing::debug!(
                            id = ?reply.id(),
                            "Dropping reply with no matching pending request"
                        );
                    }
                }
            }
        }

        let mut outbound = Vec::new();
        if is_batch {
            if !replies.is_empty() {
                outbound.push(Outbound::Frame(codec::encode_batch(&replies)));
            }
        } else {
            outbound.extend(replies.iter().map(|m| Outbound::Frame(codec::encode(m))));
        }
        outbound.extend(streams);
        outbound
    }

    fn handle_notification(&self, notification: &Notification) {
        tracing::debug!(method = %notification.method, "Inbound notification");
        for listener in &self.notification_listeners {
            listener(notification);
        }
    }

    async fn dispatch_request(&self, request: &Request) -> Reply {
        let span = tracing::info_span!(
            "mcp.dispatch",
            rpc.system = "jsonrpc",
            rpc.method = %request.method,
            rpc.jsonrpc.version = "2.0",
            rpc.jsonrpc.request_id = %request.id,
        );

        async {
            match self.dispatch_inner(request).await {
                Ok(DispatchResult::Value(result)) => {
                    Reply::Single(Message::Response(Response::success(
                        request.id.clone(),
                        result,
                    )))
                }
                Ok(DispatchResult::Stream(stream)) => Reply::Stream(stream),
                Err(error) => {
                    tracing::debug!(code = error.code, message = %error.message, "Request failed");
                    Reply::Single(Message::Error(ErrorResponse::new(
                        request.id.clone(),
                        error,
                    )))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn dispatch_inner(&self, request: &Request) -> Result<DispatchResult, ErrorData> {
        match request.method.as_str() {
            // Lifecycle
            "initialize" => self.handle_initialize(request).map(DispatchResult::Value),
            "ping" => Ok(DispatchResult::Value(serde_json::json!({}))),

            // Tools
            "tools/list" => {
                let params = decode_params::<ListParams>(request)?;
                let page = self.registry.list_tools(params.cursor.as_deref())?;
                to_value(&ListToolsResult::page(page.items, page.next_cursor))
                    .map(DispatchResult::Value)
            }
            "tools/call" => self.handle_call_tool(request).await,

            // Prompts
            "prompts/list" => {
                let params = decode_params::<ListParams>(request)?;
                let page = self.registry.list_prompts(params.cursor.as_deref())?;
                to_value(&ListPromptsResult::page(page.items, page.next_cursor))
                    .map(DispatchResult::Value)
            }
            "prompts/get" => self.handle_get_prompt(request).await.map(DispatchResult::Value),

            // Resources
            "resources/list" => {
                let params = decode_params::<ListParams>(request)?;
                let page = self.registry.list_resources(params.cursor.as_deref())?;
                to_value(&ListResourcesResult::page(page.items, page.next_cursor))
                    .map(DispatchResult::Value)
            }
            "resources/templates/list" => {
                let params = decode_params::<ListParams>(request)?;
                let page = self
                    .registry
                    .list_resource_templates(params.cursor.as_deref())?;
                to_value(&ListResourceTemplatesResult::page(page.items, page.next_cursor))
                    .map(DispatchResult::Value)
            }
            "resources/read" => self.handle_read_resource(request).await.map(DispatchResult::Value),

            // Unknown
            _ => Err(ErrorData::method_not_found(&request.method)),
        }
    }

    fn handle_initialize(&self, request: &Request) -> Result<Value, ErrorData> {
        let params: InitializeParams = serde_json::from_value(request.params.clone())
            .map_err(|e| ErrorData::invalid_params(format!("Invalid initialize params: {}", e)))?;

        tracing::info!(
            client_name = %params.client_info.name,
            client_version = %params.client_info.version,
            protocol_version = %params.protocol_version,
            "Client initializing"
        );

        let result = InitializeResult::new(self.server_info.clone(), self.capabilities());
        let result = match &self.instructions {
            Some(instructions) => result.with_instructions(instructions.clone()),
            None => result,
        };

        to_value(&result)
    }

    fn capabilities(&self) -> ServerCapabilities {
        let mut caps = ServerCapabilities::default().enable_tools();

        let has_resources = self
            .registry
            .list_resources(None)
            .map(|p| !p.items.is_empty())
            .unwrap_or(false)
            || self
                .registry
                .list_resource_templates(None)
                .map(|p| !p.items.is_empty())
                .unwrap_or(false);
        if has_resources {
            caps = caps.enable_resources();
        }

        let has_prompts = self
            .registry
            .list_prompts(None)
            .map(|p| !p.items.is_empty())
            .unwrap_or(false);
        if has_prompts {
            caps = caps.enable_prompts();
        }

        caps
    }

    async fn handle_call_tool(&self, request: &Request) -> Result<DispatchResult, ErrorData> {
        let params: CallToolParams = serde_json::from_value(request.params.clone())
            .map_err(|e| ErrorData::invalid_params(format!("Invalid call params: {}", e)))?;

        let (_, body) = self
            .registry
            .tool(&params.name)
            .ok_or_else(|| ErrorData::tool_not_found(&params.name))?;

        let arguments: Map<String, Value> = params.arguments.unwrap_or_default();

        let span = tracing::info_span!("mcp.tool.call", mcp.tool.name = %params.name);

        match body {
            ToolBody::Unary(handler) => {
                let result = handler(arguments).instrument(span).await?;
                Ok(DispatchResult::Value(to_value(&result)?))
            }
            ToolBody::Streaming(handler) => Ok(DispatchResult::Stream(handler(arguments))),
        }
    }

    async fn handle_get_prompt(&self, request: &Request) -> Result<Value, ErrorData> {
        let params: GetPromptParams = serde_json::from_value(request.params.clone())
            .map_err(|e| ErrorData::invalid_params(format!("Invalid get params: {}", e)))?;

        let (_, handler) = self
            .registry
            .prompt(&params.name)
            .ok_or_else(|| ErrorData::prompt_not_found(&params.name))?;

        let arguments: HashMap<String, String> = params.arguments.unwrap_or_default();
        let result = handler(arguments).await?;
        to_value(&result)
    }

    async fn handle_read_resource(&self, request: &Request) -> Result<Value, ErrorData> {
        let params: ReadResourceParams = serde_json::from_value(request.params.clone())
            .map_err(|e| ErrorData::invalid_params(format!("Invalid read params: {}", e)))?;

        let handler = self
            .registry
            .resource_reader(&params.uri)
            .ok_or_else(|| ErrorData::resource_not_found(&params.uri))?;

        let span = tracing::info_span!("mcp.resource.read", mcp.resource.uri = %params.uri);
        let result = handler(params.uri.clone()).instrument(span).await?;
        to_value(&result)
    }
}

enum Reply {
    Single(Message),
    Stream(BoxStream<'static, Value>),
}

enum DispatchResult {
    Value(Value),
    Stream(BoxStream<'static, Value>),
}

fn decode_params<T: serde::de::DeserializeOwned>(request: &Request) -> Result<T, ErrorData> {
    serde_json::from_value(request.params.clone())
        .map_err(|e| ErrorData::invalid_params(format!("Invalid params: {}", e)))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ErrorData> {
    serde_json::to_value(value)
        .map_err(|e| ErrorData::internal_error(format!("Failed to serialize result: {}", e)))
}
