//! Models, Capabilities, and Actions

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// A declarative token stating what a model can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    InputMessages,
    InputText,
    InputImage,
    InputAudio,
    InputPdf,
    InputVideo,
    InputMultiple,
    OutputText,
    OutputStreaming,
    OutputStructured,
    OutputAudio,
    OutputImage,
    ToolCalling,
    Embeddings,
    Thinking,
    TextToSpeech,
}

/// The semantic operation requested of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Chat,
    CompleteChat,
    CalculateEmbeddings,
    GenerateImage,
    GenerateAudio,
    TranscribeAudio,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Action::Chat => "chat",
            Action::CompleteChat => "complete-chat",
            Action::CalculateEmbeddings => "calculate-embeddings",
            Action::GenerateImage => "generate-image",
            Action::GenerateAudio => "generate-audio",
            Action::TranscribeAudio => "transcribe-audio",
        };
        write!(f, "{}", name)
    }
}

/// A resolved model: name, capability set, and provider options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Model name as known to its provider.
    pub name: String,

    /// Declared capabilities.
    pub capabilities: HashSet<Capability>,

    /// Provider-specific options merged into every request.
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl Model {
    /// Create a model with the given capabilities and no options.
    pub fn new(name: impl Into<String>, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            name: name.into(),
            capabilities: capabilities.into_iter().collect(),
            options: Map::new(),
        }
    }

    /// Set provider options.
    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = options;
        self
    }

    /// True if the model declares the capability.
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// True if the model declares every capability in the set.
    pub fn supports_all(&self, capabilities: &[Capability]) -> bool {
        capabilities.iter().all(|c| self.capabilities.contains(c))
    }
}
