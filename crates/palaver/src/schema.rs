//! Tool Schema Generation
//!
//! Derives a tool input schema from a Rust parameter type via schemars,
//! so handlers declare their arguments once as a `JsonSchema` struct.

use schemars::JsonSchema;

use crate::types::tool::ToolSchema;

/// Generate a tool input schema from a `JsonSchema` type.
///
/// Inline references are resolved so the result is a self-contained
/// object schema suitable for `tools/list`.
pub fn schema_for<T: JsonSchema>() -> ToolSchema {
    let settings = schemars::generate::SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
    });
    let generator = settings.into_generator();
    let schema = generator.into_root_schema_for::<T>();
    ToolSchema::from_value(schema.to_value())
}
