//! Error Types
//!
//! Dispatch failures surface through `PlatformError`; protocol-level
//! problems never appear here - those belong to the MCP runtime.

use crate::model::Action;

/// Errors from the dispatch pipeline and failover layer.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// Model name lookup failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// No normalizer in the chain accepted the input.
    #[error("no normalizer accepts input for model '{0}'")]
    MissingNormalizer(String),

    /// No registered model client supports the (model, action) pair.
    #[error("no model client supports model '{model}' for action '{action}'")]
    NoModelClient { model: String, action: Action },

    /// No registered converter can interpret the raw result.
    #[error("no result converter supports model '{0}'")]
    NoResultConverter(String),

    /// Every wrapped platform failed and the retry budget is spent.
    #[error("all platforms failed")]
    AllPlatformsFailed,

    /// The input shape does not fit any action.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A model client reported a transport or provider failure.
    #[error("model client error: {0}")]
    Client(String),
}

/// Errors from model catalogs.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The catalog has no entry for this model name.
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    /// A remote catalog fetch failed.
    #[error("catalog fetch failed: {0}")]
    Fetch(String),
}

/// Errors from tool-call argument resolution.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ArgumentError {
    /// A required parameter has no matching argument.
    #[error("missing required argument '{0}'")]
    MissingArgument(String),

    /// The argument value does not match the declared type.
    #[error("argument '{path}' expected {expected}, got {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: String,
    },

    /// A date-time argument is not valid RFC 3339.
    #[error("argument '{0}' is not a valid RFC 3339 date-time: {1}")]
    InvalidDateTime(String, String),

    /// An enumeration argument names no declared variant.
    #[error("argument '{path}' has unknown enum variant '{variant}'")]
    UnknownEnumVariant { path: String, variant: String },

    /// A polymorphic object carries an unknown discriminator value.
    #[error("argument '{path}' has unknown discriminator value '{value}'")]
    UnknownDiscriminator { path: String, value: String },

    /// The declared schema cannot be turned into a descriptor table.
    #[error("unsupported parameter schema: {0}")]
    BadSchema(String),
}
