//! Prompt Types
//!
//! Types for MCP prompt templates and messages.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::content::Content;
use super::Role;

/// A prompt template that the server offers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    /// Programmatic name of the prompt.
    pub name: String,

    /// Description of what this prompt provides.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Arguments that can be used to template the prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<PromptArgument>>,
}

impl Prompt {
    /// Create a new prompt.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            arguments: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add an argument.
    pub fn argument(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.arguments.get_or_insert_with(Vec::new).push(PromptArgument {
            name: name.into(),
            description: Some(description.into()),
            required: Some(required),
        });
        self
    }
}

/// An argument that a prompt can accept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptArgument {
    /// Programmatic name of the argument.
    pub name: String,

    /// Description of the argument.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether this argument is required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

/// A message in a prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptMessage {
    /// Role of the message sender.
    pub role: Role,

    /// Content of the message.
    pub content: Content,
}

impl PromptMessage {
    /// Create a user message with text content.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::text(text),
        }
    }

    /// Create an assistant message with text content.
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::text(text),
        }
    }
}

/// Parameters for prompts/get request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptParams {
    /// Name of the prompt to get.
    pub name: String,

    /// Arguments to use for templating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<HashMap<String, String>>,
}

/// Result of prompts/get request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptResult {
    /// Optional description of the prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Messages that make up the prompt.
    pub messages: Vec<PromptMessage>,
}

impl GetPromptResult {
    /// Create a result with messages.
    pub fn new(messages: Vec<PromptMessage>) -> Self {
        Self {
            description: None,
            messages,
        }
    }
}

/// Result of prompts/list request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResult {
    /// Prompts in this page.
    pub prompts: Vec<Prompt>,

    /// Pagination cursor for the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl ListPromptsResult {
    /// Create a single page with an optional continuation cursor.
    pub fn page(prompts: Vec<Prompt>, next_cursor: Option<String>) -> Self {
        Self {
            prompts,
            next_cursor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_creation() {
        let prompt = Prompt::new("summarize")
            .with_description("Summarize a conversation")
            .argument("length", "Target length in sentences", true);

        let json = serde_json::to_value(&prompt).unwrap();
        assert_eq!(json["name"], "summarize");
        assert_eq!(json["arguments"][0]["name"], "length");
        assert_eq!(json["arguments"][0]["required"], true);
    }

    #[test]
    fn test_prompt_message() {
        let message = PromptMessage::user_text("Summarize the last hour");

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"]["type"], "text");
    }

    #[test]
    fn test_get_prompt_params_roundtrip() {
        let params = GetPromptParams {
            name: "summarize".to_string(),
            arguments: Some(HashMap::from([(
                "length".to_string(),
                "3".to_string(),
            )])),
        };

        let json = serde_json::to_string(&params).unwrap();
        let parsed: GetPromptParams = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name, "summarize");
        assert_eq!(parsed.arguments.unwrap()["length"], "3");
    }
}
