//! palaver - MCP (Model Context Protocol) runtime for Rust
//!
//! A bidirectional JSON-RPC 2.0 server and client for exposing tools,
//! prompts, and resources over pluggable transports: line-delimited
//! stdio, Streamable HTTP with session resumption, and SSE.
//!
//! # Server Example
//!
//! ```rust,ignore
//! use palaver::{CapabilityRegistry, McpServer, ServerConfig, Tool, CallToolResult};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(CapabilityRegistry::new());
//! registry.register_tool(
//!     Tool::new("hello", "Say hello"),
//!     Arc::new(|_args| Box::pin(async { Ok(CallToolResult::text("Hello!")) })),
//! );
//!
//! let transport = palaver::StdioTransport::new();
//! let mut server = McpServer::new(transport, registry, ServerConfig::new("my-server", "0.1.0"));
//! server.run().await?;
//! ```
//!
//! # Client Example
//!
//! ```rust,ignore
//! use palaver::McpClient;
//!
//! let mut client = McpClient::new(transport);
//! client.initialize().await?;
//! let tools = client.list_tools().await?;
//! let content = client.call_tool("hello", None).await?;
//! ```

pub mod client;
pub mod codec;
pub mod keepalive;
pub mod pending;
pub mod registry;
pub mod schema;
pub mod server;
pub mod session;
pub mod transport;
pub mod types;

// Re-export commonly used types at crate root
pub use types::content::Content;
pub use types::error::ErrorData;
pub use types::jsonrpc::{Message, Notification, Request, RequestId, Response};
pub use types::protocol::{Implementation, ServerCapabilities, PROTOCOL_VERSION};
pub use types::prompt::{GetPromptResult, Prompt, PromptMessage};
pub use types::resource::{ReadResourceResult, Resource, ResourceContents, ResourceTemplate};
pub use types::tool::{CallToolResult, Tool, ToolSchema};

// Re-export session types
pub use session::{spawn_cleanup_task, FileSessionStore, InMemorySessionStore, SessionStore};

// Re-export runtime pieces
pub use client::{ClientError, ClientOptions, McpClient};
pub use keepalive::{KeepAlive, PingPolicy};
pub use pending::PendingBag;
pub use registry::{CapabilityKind, CapabilityRegistry, ChangeEvent};
pub use server::{JsonRpcProcessor, McpServer, ServerConfig};

// Re-export transports
pub use transport::{
    SseTransport, StdioTransport, StreamableHttpConfig, StreamableHttpTransport, Transport,
    TransportError, TransportState,
};

// Re-export schema helper
pub use schema::schema_for;
