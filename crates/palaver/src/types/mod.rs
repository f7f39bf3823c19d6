//! MCP Protocol Types
//!
//! Type definitions for the MCP 2025-06-18 wire protocol, organized by role:
//!
//! - `jsonrpc` - JSON-RPC 2.0 base types (requests, responses, errors)
//! - `error` - error payloads with standard error codes
//! - `protocol` - initialize handshake and capability negotiation
//! - `tool` - tool definitions and call results
//! - `content` - content blocks (text, image, audio, resource)
//! - `resource` - resource definitions and contents
//! - `prompt` - prompt templates and messages

pub mod content;
pub mod error;
pub mod jsonrpc;
pub mod prompt;
pub mod protocol;
pub mod resource;
pub mod tool;

// Common types used across modules
use serde::{Deserialize, Serialize};

/// Optional annotations for content and resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Annotations {
    /// Who the intended audience is: "user", "assistant", or both.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<Vec<Role>>,

    /// Priority from 0.0 (least important) to 1.0 (most important).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,

    /// ISO 8601 timestamp of last modification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// Role in a conversation - user or assistant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Parameters shared by all paginated list requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListParams {
    /// Opaque cursor from a previous page, absent for the first page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}
