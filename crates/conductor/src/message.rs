//! Input Messages
//!
//! The provider-agnostic message bag handed to the dispatcher, with the
//! multimodal part types the routing rules inspect.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One part of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    /// Plain text.
    Text { text: String },

    /// Base64-encoded image.
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    /// Base64-encoded audio.
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    /// Base64-encoded document (PDF and friends).
    Document {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    /// Base64-encoded video.
    Video {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl MessagePart {
    /// Create a text part.
    pub fn text(text: impl Into<String>) -> Self {
        MessagePart::Text { text: text.into() }
    }

    /// Approximate size in bytes, used for token estimation.
    pub fn byte_len(&self) -> usize {
        match self {
            MessagePart::Text { text } => text.len(),
            MessagePart::Image { data, .. }
            | MessagePart::Audio { data, .. }
            | MessagePart::Document { data, .. }
            | MessagePart::Video { data, .. } => data.len(),
        }
    }
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

impl Message {
    /// Create a user message with a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![MessagePart::text(text)],
        }
    }

    /// Create a system message with a single text part.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            parts: vec![MessagePart::text(text)],
        }
    }

    /// Append a part.
    pub fn with_part(mut self, part: MessagePart) -> Self {
        self.parts.push(part);
        self
    }
}

/// The ordered bag of messages for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageBag(pub Vec<Message>);

impl MessageBag {
    /// Create a bag from messages.
    pub fn new(messages: Vec<Message>) -> Self {
        Self(messages)
    }

    /// All parts across all messages, in order.
    pub fn parts(&self) -> impl Iterator<Item = &MessagePart> {
        self.0.iter().flat_map(|m| m.parts.iter())
    }

    /// True if any part matches the predicate.
    pub fn has_part(&self, predicate: impl Fn(&MessagePart) -> bool) -> bool {
        self.parts().any(predicate)
    }

    /// Total content size in bytes.
    pub fn byte_len(&self) -> usize {
        self.parts().map(|p| p.byte_len()).sum()
    }
}

/// The payload shape handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputData {
    /// A conversation.
    Messages(MessageBag),
    /// A bare string (typically for embeddings).
    Text(String),
}

impl InputData {
    /// Total content size in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            InputData::Messages(bag) => bag.byte_len(),
            InputData::Text(text) => text.len(),
        }
    }
}

/// A dispatch request: target model, payload, and per-call options.
#[derive(Debug, Clone)]
pub struct Input {
    /// Requested model name; routers may rewrite it.
    pub model: String,

    /// The payload.
    pub data: InputData,

    /// Per-call options (action override, sampling parameters, ...).
    pub options: Map<String, Value>,
}

impl Input {
    /// Chat input over a message bag.
    pub fn messages(model: impl Into<String>, bag: MessageBag) -> Self {
        Self {
            model: model.into(),
            data: InputData::Messages(bag),
            options: Map::new(),
        }
    }

    /// Plain text input.
    pub fn text(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            data: InputData::Text(text.into()),
            options: Map::new(),
        }
    }

    /// Set an option.
    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}
