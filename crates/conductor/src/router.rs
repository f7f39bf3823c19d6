//! Model Routing
//!
//! Input processors that rewrite the target model of an in-flight request
//! before dispatch: by content type, by token estimate, or by required
//! capability. Routers are tried in declared order; the first one with an
//! opinion wins, and a transformer attached to the decision may rewrite
//! the message bag or options without re-triggering routing.

use async_trait::async_trait;
use std::sync::Arc;

use crate::catalog::ModelCatalog;
use crate::error::PlatformError;
use crate::message::{Input, InputData, MessagePart};
use crate::model::Capability;
use crate::platform::InputProcessor;

/// Read-only view handed to routers.
pub struct RouterContext {
    /// Model used when the input names none.
    pub default_model: String,
    catalog: Arc<dyn ModelCatalog>,
}

impl RouterContext {
    /// Create a context over a catalog.
    pub fn new(default_model: impl Into<String>, catalog: Arc<dyn ModelCatalog>) -> Self {
        Self {
            default_model: default_model.into(),
            catalog,
        }
    }

    /// The catalog behind this context.
    pub fn catalog(&self) -> &Arc<dyn ModelCatalog> {
        &self.catalog
    }

    /// Names of models carrying every capability in the set, catalog order.
    pub async fn find_models_with_capability(&self, capabilities: &[Capability]) -> Vec<String> {
        self.catalog.find_models_with_capabilities(capabilities).await
    }
}

/// Rewrites the message bag or options after a routing decision.
pub trait InputTransformer: Send + Sync {
    /// Transform the input. Runs once; never re-triggers routing.
    fn transform(&self, input: Input) -> Input;
}

/// A routing decision.
pub struct RoutingResult {
    /// The model the request should go to.
    pub target_model: String,
    /// Human-readable reason, logged with the rewrite.
    pub reason: String,
    /// Optional input rewrite applied with the decision.
    pub transformer: Option<Arc<dyn InputTransformer>>,
}

impl RoutingResult {
    /// Decision without a transformer.
    pub fn to(target_model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target_model: target_model.into(),
            reason: reason.into(),
            transformer: None,
        }
    }
}

/// A routing rule. `None` means "no opinion, ask the next router".
#[async_trait]
pub trait ModelRouter: Send + Sync {
    async fn route(
        &self,
        input: &Input,
        context: &RouterContext,
    ) -> Result<Option<RoutingResult>, PlatformError>;
}

/// Tries routers in declared order, stopping at the first decision.
pub struct ChainRouter {
    routers: Vec<Arc<dyn ModelRouter>>,
}

impl ChainRouter {
    /// Build from an ordered router list.
    pub fn new(routers: Vec<Arc<dyn ModelRouter>>) -> Self {
        Self { routers }
    }
}

#[async_trait]
impl ModelRouter for ChainRouter {
    async fn route(
        &self,
        input: &Input,
        context: &RouterContext,
    ) -> Result<Option<RoutingResult>, PlatformError> {
        for router in &self.routers {
            if let Some(result) = router.route(input, context).await? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }
}

/// Routes by inspecting the message bag for non-text parts: an image part
/// needs a model with input-image, audio needs input-audio, and so on.
#[derive(Debug, Default)]
pub struct ContentTypeRouter;

impl ContentTypeRouter {
    /// Create the router.
    pub fn new() -> Self {
        Self
    }

    fn required_capability(data: &InputData) -> Option<Capability> {
        let bag = match data {
            InputData::Messages(bag) => bag,
            InputData::Text(_) => return None,
        };

        // First non-text modality decides; input-multiple combinations are
        // handled by the capability set of whatever model wins.
        bag.parts().find_map(|part| match part {
            MessagePart::Image { .. } => Some(Capability::InputImage),
            MessagePart::Audio { .. } => Some(Capability::InputAudio),
            MessagePart::Document { .. } => Some(Capability::InputPdf),
            MessagePart::Video { .. } => Some(Capability::InputVideo),
            MessagePart::Text { .. } => None,
        })
    }
}

#[async_trait]
impl ModelRouter for ContentTypeRouter {
    async fn route(
        &self,
        input: &Input,
        context: &RouterContext,
    ) -> Result<Option<RoutingResult>, PlatformError> {
        let required = match Self::required_capability(&input.data) {
            Some(capability) => capability,
            None => return Ok(None),
        };

        // Current model already handles the modality: leave it alone.
        if let Ok(model) = context.catalog().get_model(&input.model).await {
            if model.supports(required) {
                return Ok(None);
            }
        }

        let candidates = context.find_models_with_capability(&[required]).await;
        match candidates.into_iter().next() {
            Some(target) => Ok(Some(RoutingResult::to(
                target,
                format!("input requires {:?}", required),
            ))),
            None => Ok(None),
        }
    }
}

/// Routes by token estimate (bytes / 4) against ascending size tiers.
pub struct TokenBudgetRouter {
    /// (exclusive token ceiling, target model), ascending.
    tiers: Vec<(usize, String)>,
    /// Target when the estimate clears every tier.
    overflow: String,
}

impl TokenBudgetRouter {
    /// Build from ascending tiers and an overflow target.
    pub fn new(tiers: Vec<(usize, String)>, overflow: impl Into<String>) -> Self {
        Self {
            tiers,
            overflow: overflow.into(),
        }
    }

    /// Rough token estimate: one token per four bytes of content.
    pub fn estimate_tokens(data: &InputData) -> usize {
        data.byte_len() / 4
    }
}

#[async_trait]
impl ModelRouter for TokenBudgetRouter {
    async fn route(
        &self,
        input: &Input,
        _context: &RouterContext,
    ) -> Result<Option<RoutingResult>, PlatformError> {
        let estimate = Self::estimate_tokens(&input.data);

        let target = self
            .tiers
            .iter()
            .find(|(ceiling, _)| estimate < *ceiling)
            .map(|(_, model)| model.as_str())
            .unwrap_or(self.overflow.as_str());

        if target == input.model {
            return Ok(None);
        }

        Ok(Some(RoutingResult::to(
            target,
            format!("estimated {} tokens", estimate),
        )))
    }
}

/// Routes when the current model lacks a required capability: the first
/// catalog model carrying it wins.
pub struct CapabilityRouter {
    required: Capability,
}

impl CapabilityRouter {
    /// Router guarding one capability.
    pub fn new(required: Capability) -> Self {
        Self { required }
    }
}

#[async_trait]
impl ModelRouter for CapabilityRouter {
    async fn route(
        &self,
        input: &Input,
        context: &RouterContext,
    ) -> Result<Option<RoutingResult>, PlatformError> {
        if let Ok(model) = context.catalog().get_model(&input.model).await {
            if model.supports(self.required) {
                return Ok(None);
            }
        }

        let candidates = context.find_models_with_capability(&[self.required]).await;
        match candidates.into_iter().next() {
            Some(target) => Ok(Some(RoutingResult::to(
                target,
                format!("model lacks {:?}", self.required),
            ))),
            None => Ok(None),
        }
    }
}

/// Plugs a router into the dispatcher as an input processor.
pub struct RoutingProcessor {
    router: Arc<dyn ModelRouter>,
    context: RouterContext,
}

impl RoutingProcessor {
    /// Create a processor applying `router` under `context`.
    pub fn new(router: Arc<dyn ModelRouter>, context: RouterContext) -> Self {
        Self { router, context }
    }
}

#[async_trait]
impl InputProcessor for RoutingProcessor {
    async fn process(&self, input: Input) -> Result<Input, PlatformError> {
        let mut input = input;
        if input.model.is_empty() {
            input.model = self.context.default_model.clone();
        }

        match self.router.route(&input, &self.context).await? {
            Some(decision) => {
                tracing::info!(
                    from = %input.model,
                    to = %decision.target_model,
                    reason = %decision.reason,
                    "Routing model rewrite"
                );
                input.model = decision.target_model;
                if let Some(transformer) = decision.transformer {
                    // Transformation never re-enters routing.
                    input = transformer.transform(input);
                }
                Ok(input)
            }
            None => Ok(input),
        }
    }
}
