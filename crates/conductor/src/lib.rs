//! conductor - provider-agnostic model dispatch
//!
//! The platform core underneath AI-model-backed services: select a model
//! client by (model, action), normalize requests through an ordered
//! chain, and return deferred results. On top sit a failover platform
//! that rotates between backends under a retry-period policy gated by a
//! rate limiter, and a model router that rewrites the target model of an
//! in-flight request by content type, token estimate, or required
//! capability.
//!
//! # Example
//!
//! ```rust,ignore
//! use conductor::{Dispatcher, Input, Platform};
//! use std::sync::Arc;
//!
//! let dispatcher = Dispatcher::new(catalog)
//!     .with_normalizer(Arc::new(MyNormalizer))
//!     .with_client(Arc::new(MyClient))
//!     .with_converter(Arc::new(MyConverter));
//!
//! let deferred = dispatcher.invoke(Input::text("small", "hello")).await?;
//! let result = deferred.resolve().await?;
//! ```

pub mod arguments;
pub mod catalog;
pub mod error;
pub mod failover;
pub mod message;
pub mod model;
pub mod platform;
pub mod result;
pub mod router;

// Re-export the working set at crate root
pub use arguments::{
    build_parameter_table, resolve_arguments, ParameterKind, ParameterSpec, ResolvedArgument,
};
pub use catalog::{FallbackCatalog, ModelCatalog, ModelEntry, RemoteCatalog, StaticCatalog};
pub use error::{ArgumentError, CatalogError, PlatformError};
pub use failover::{FailoverConfig, FailoverPlatform, RateLimiter};
pub use message::{Input, InputData, Message, MessageBag, MessagePart, Role};
pub use model::{Action, Capability, Model};
pub use platform::{
    Dispatcher, InputProcessor, ModelClient, Normalizer, Platform, ResultConverter,
};
pub use result::{DeferredResult, PlatformResult, RawResult, ResultChunk, ToolCall};
pub use router::{
    CapabilityRouter, ChainRouter, ContentTypeRouter, InputTransformer, ModelRouter,
    RouterContext, RoutingProcessor, RoutingResult, TokenBudgetRouter,
};
