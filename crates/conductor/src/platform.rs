//! Platform Dispatch
//!
//! The provider-agnostic dispatcher: resolve the model, run input
//! processors, normalize the payload, pick a model client, and hand back
//! a deferred result. Providers plug in at three trait seams - normalizer,
//! model client, result converter - selected from small ordered registries.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::catalog::ModelCatalog;
use crate::error::PlatformError;
use crate::message::{Input, InputData};
use crate::model::{Action, Capability, Model};
use crate::result::{DeferredResult, PlatformResult, RawResult};

/// Transforms a generic input into a provider-specific payload.
///
/// Normalizers run as an ordered chain; every normalizer whose `supports`
/// matches transforms the payload in turn. Order is declaration order and
/// deterministic across calls.
pub trait Normalizer: Send + Sync {
    /// True if this normalizer applies to the (model, input) pair.
    fn supports(&self, model: &Model, data: &InputData) -> bool;

    /// Transform the payload.
    fn normalize(&self, model: &Model, payload: Value) -> Result<Value, PlatformError>;
}

/// Sends a normalized payload to a provider.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// True if this client can serve the (model, action) pair.
    fn supports(&self, model: &Model, action: Action) -> bool;

    /// Perform the request and return the raw result.
    async fn request(
        &self,
        model: &Model,
        action: Action,
        payload: &Value,
        options: &Map<String, Value>,
    ) -> Result<RawResult, PlatformError>;
}

/// Interprets a raw result into a typed one.
pub trait ResultConverter: Send + Sync {
    /// True if this converter understands results for the model.
    fn supports(&self, model: &Model) -> bool;

    /// Convert the raw result.
    fn convert(&self, raw: RawResult) -> Result<PlatformResult, PlatformError>;
}

/// Hook applied to the input before model resolution (the router plugs in
/// here).
#[async_trait]
pub trait InputProcessor: Send + Sync {
    /// Transform the input; returning it unchanged is fine.
    async fn process(&self, input: Input) -> Result<Input, PlatformError>;
}

/// A model invocation surface: the dispatcher implements it directly, the
/// failover platform wraps a list of them.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Dispatch one request, returning a deferred result.
    async fn invoke(&self, input: Input) -> Result<DeferredResult, PlatformError>;

    /// The catalog callers should resolve model names against.
    async fn model_catalog(&self) -> Result<Arc<dyn ModelCatalog>, PlatformError>;
}

/// The dispatcher: holds the catalog and the three extension registries.
///
/// Re-entrant; no per-call state beyond the returned deferred result.
pub struct Dispatcher {
    catalog: Arc<dyn ModelCatalog>,
    processors: Vec<Arc<dyn InputProcessor>>,
    normalizers: Vec<Arc<dyn Normalizer>>,
    clients: Vec<Arc<dyn ModelClient>>,
    converters: Vec<Arc<dyn ResultConverter>>,
}

impl Dispatcher {
    /// Create a dispatcher over a catalog.
    pub fn new(catalog: Arc<dyn ModelCatalog>) -> Self {
        Self {
            catalog,
            processors: Vec::new(),
            normalizers: Vec::new(),
            clients: Vec::new(),
            converters: Vec::new(),
        }
    }

    /// Append an input processor.
    pub fn with_processor(mut self, processor: Arc<dyn InputProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Append a normalizer to the chain.
    pub fn with_normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.normalizers.push(normalizer);
        self
    }

    /// Append a model client.
    pub fn with_client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.clients.push(client);
        self
    }

    /// Append a result converter.
    pub fn with_converter(mut self, converter: Arc<dyn ResultConverter>) -> Self {
        self.converters.push(converter);
        self
    }

    /// Determine the action: explicit option first, then input shape.
    fn resolve_action(model: &Model, input: &Input) -> Result<Action, PlatformError> {
        if let Some(action) = input.options.get("action") {
            return serde_json::from_value(action.clone())
                .map_err(|e| PlatformError::InvalidInput(format!("Bad action option: {}", e)));
        }

        match &input.data {
            InputData::Messages(_) => Ok(Action::Chat),
            InputData::Text(_) if model.supports(Capability::Embeddings) => {
                Ok(Action::CalculateEmbeddings)
            }
            InputData::Text(_) => Ok(Action::Chat),
        }
    }

    fn normalize(&self, model: &Model, data: &InputData) -> Result<Value, PlatformError> {
        let mut payload = serde_json::to_value(data)
            .map_err(|e| PlatformError::InvalidInput(format!("Unserializable input: {}", e)))?;

        let mut matched = false;
        for normalizer in &self.normalizers {
            if normalizer.supports(model, data) {
                matched = true;
                payload = normalizer.normalize(model, payload)?;
            }
        }

        if !matched {
            return Err(PlatformError::MissingNormalizer(model.name.clone()));
        }
        Ok(payload)
    }
}

#[async_trait]
impl Platform for Dispatcher {
    #[tracing::instrument(skip(self, input), fields(model = %input.model))]
    async fn invoke(&self, input: Input) -> Result<DeferredResult, PlatformError> {
        let mut input = input;
        for processor in &self.processors {
            input = processor.process(input).await?;
        }

        let model = self.catalog.get_model(&input.model).await?;
        let action = Self::resolve_action(&model, &input)?;

        tracing::debug!(model = %model.name, action = %action, "Dispatching");

        let payload = self.normalize(&model, &input.data)?;

        let client = self
            .clients
            .iter()
            .find(|c| c.supports(&model, action))
            .ok_or_else(|| PlatformError::NoModelClient {
                model: model.name.clone(),
                action,
            })?;

        let raw = client.request(&model, action, &payload, &input.options).await?;

        let converter = self
            .converters
            .iter()
            .find(|c| c.supports(&model))
            .cloned()
            .ok_or_else(|| PlatformError::NoResultConverter(model.name.clone()))?;

        Ok(DeferredResult::new(raw, converter))
    }

    async fn model_catalog(&self) -> Result<Arc<dyn ModelCatalog>, PlatformError> {
        Ok(self.catalog.clone())
    }
}
