//! MCP Protocol Types
//!
//! Types for the MCP initialization handshake and capability negotiation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The MCP protocol version this runtime speaks.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Server or client implementation info.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Implementation {
    /// Programmatic name of the implementation.
    pub name: String,

    /// Version string.
    pub version: String,
}

impl Implementation {
    /// Create a new implementation info.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Initialize request params from client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version the client supports.
    pub protocol_version: String,

    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,

    /// Client implementation info.
    pub client_info: Implementation,
}

/// Initialize result from server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the server wants to use.
    pub protocol_version: String,

    /// Server capabilities.
    pub capabilities: ServerCapabilities,

    /// Server implementation info.
    pub server_info: Implementation,

    /// Optional instructions for the LLM.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl InitializeResult {
    /// Create a new initialize result.
    pub fn new(server_info: Implementation, capabilities: ServerCapabilities) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities,
            server_info,
            instructions: None,
        }
    }

    /// Set instructions for the LLM.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

/// Server capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Server offers tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListChangedCapability>,

    /// Server offers resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ListChangedCapability>,

    /// Server offers prompts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListChangedCapability>,
}

impl ServerCapabilities {
    /// Enable tools.
    pub fn enable_tools(mut self) -> Self {
        self.tools = Some(ListChangedCapability::notifying());
        self
    }

    /// Enable resources.
    pub fn enable_resources(mut self) -> Self {
        self.resources = Some(ListChangedCapability::notifying());
        self
    }

    /// Enable prompts.
    pub fn enable_prompts(mut self) -> Self {
        self.prompts = Some(ListChangedCapability::notifying());
        self
    }
}

/// Capability that supports list_changed notifications.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChangedCapability {
    /// Server emits `notifications/*/list_changed` for this kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

impl ListChangedCapability {
    fn notifying() -> Self {
        Self {
            list_changed: Some(true),
        }
    }
}
