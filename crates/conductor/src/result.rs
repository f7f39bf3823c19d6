//! Results
//!
//! Raw transport results, typed platform results, and the deferred handle
//! that converts one into the other at await time.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::PlatformError;
use crate::platform::ResultConverter;

/// A tool call requested by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back with the result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Arguments as a JSON object.
    pub arguments: Value,
}

/// One chunk of a streaming result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultChunk {
    /// Text delta.
    pub delta: String,
    /// Chunk index within the stream.
    pub index: usize,
}

/// The raw outcome of a model client request, before conversion.
pub enum RawResult {
    /// A complete JSON document.
    Json(Value),
    /// A stream of JSON chunks.
    Stream(BoxStream<'static, Value>),
}

impl std::fmt::Debug for RawResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawResult::Json(value) => f.debug_tuple("Json").field(value).finish(),
            RawResult::Stream(_) => f.debug_tuple("Stream").field(&"..").finish(),
        }
    }
}

/// A converted, typed result.
pub enum PlatformResult {
    /// Generated text.
    Text(String),
    /// Tool calls the model wants executed.
    ToolCalls(Vec<ToolCall>),
    /// Embedding vectors.
    Vectors(Vec<Vec<f32>>),
    /// A stream of text chunks.
    Stream(BoxStream<'static, ResultChunk>),
}

impl PlatformResult {
    /// The text, if this is a text result.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PlatformResult::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The vectors, if this is an embeddings result.
    pub fn as_vectors(&self) -> Option<&[Vec<f32>]> {
        match self {
            PlatformResult::Vectors(vectors) => Some(vectors),
            _ => None,
        }
    }
}

impl std::fmt::Debug for PlatformResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformResult::Text(text) => f.debug_tuple("Text").field(text).finish(),
            PlatformResult::ToolCalls(calls) => f.debug_tuple("ToolCalls").field(calls).finish(),
            PlatformResult::Vectors(vectors) => {
                f.debug_tuple("Vectors").field(&vectors.len()).finish()
            }
            PlatformResult::Stream(_) => f.debug_tuple("Stream").field(&"..").finish(),
        }
    }
}

/// A deferred result: the raw outcome plus the converter that will
/// interpret it. Conversion runs when the caller resolves the handle, not
/// when the dispatcher returns.
pub struct DeferredResult {
    raw: RawResult,
    converter: Arc<dyn ResultConverter>,
}

impl std::fmt::Debug for DeferredResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredResult").field("raw", &self.raw).finish()
    }
}

impl DeferredResult {
    /// Pair a raw result with its converter.
    pub fn new(raw: RawResult, converter: Arc<dyn ResultConverter>) -> Self {
        Self { raw, converter }
    }

    /// Convert and return the typed result.
    pub async fn resolve(self) -> Result<PlatformResult, PlatformError> {
        self.converter.convert(self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TextConverter;

    impl ResultConverter for TextConverter {
        fn supports(&self, _model: &crate::model::Model) -> bool {
            true
        }

        fn convert(&self, raw: RawResult) -> Result<PlatformResult, PlatformError> {
            match raw {
                RawResult::Json(value) => Ok(PlatformResult::Text(
                    value.get("text").and_then(|t| t.as_str()).unwrap_or("").to_string(),
                )),
                RawResult::Stream(_) => Err(PlatformError::InvalidInput(
                    "stream not supported".into(),
                )),
            }
        }
    }

    #[tokio::test]
    async fn test_deferred_resolves_through_converter() {
        let deferred = DeferredResult::new(
            RawResult::Json(serde_json::json!({"text": "hello"})),
            Arc::new(TextConverter),
        );

        let result = deferred.resolve().await.unwrap();
        assert_eq!(result.as_text(), Some("hello"));
    }
}
