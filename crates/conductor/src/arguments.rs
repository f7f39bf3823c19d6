//! Tool-Call Argument Resolution
//!
//! Reifies inbound JSON tool-call arguments into typed positional values
//! for a target handler. A descriptor table is generated once from the
//! tool's declared JSON Schema; resolution walks the table in declared
//! order, coercing each argument by its type tag.
//!
//! Unknown argument keys are ignored for forward compatibility; a call is
//! resolved completely or not at all.

use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};

use crate::error::ArgumentError;

/// The type tag of a declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterKind {
    Bool,
    Integer,
    Number,
    String,
    /// RFC 3339 date-time.
    DateTime,
    /// Enumeration matched by variant name.
    Enum(Vec<String>),
    /// Array with typed elements (arbitrarily nested).
    Array(Box<ParameterKind>),
    /// Object, optionally polymorphic over a discriminator field.
    Object {
        /// (field name, known values); an empty value list accepts any.
        discriminator: Option<(String, Vec<String>)>,
    },
    /// No constraint declared.
    Any,
}

impl ParameterKind {
    fn expected(&self) -> &'static str {
        match self {
            ParameterKind::Bool => "boolean",
            ParameterKind::Integer => "integer",
            ParameterKind::Number => "number",
            ParameterKind::String => "string",
            ParameterKind::DateTime => "date-time string",
            ParameterKind::Enum(_) => "enum string",
            ParameterKind::Array(_) => "array",
            ParameterKind::Object { .. } => "object",
            ParameterKind::Any => "any",
        }
    }
}

/// One entry of the descriptor table.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    /// Parameter name, matched against argument keys.
    pub name: String,
    /// Whether the argument must be present.
    pub required: bool,
    /// Value used when an optional argument is absent.
    pub default: Option<Value>,
    /// Type tag driving coercion.
    pub kind: ParameterKind,
}

/// A resolved, typed argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedArgument {
    Bool(bool),
    Integer(i64),
    Number(f64),
    String(String),
    DateTime(DateTime<FixedOffset>),
    Enum(String),
    Array(Vec<ResolvedArgument>),
    Object(Value),
    Any(Value),
    /// Optional argument absent with no default.
    Null,
}

/// Build the descriptor table from a tool's declared JSON Schema.
///
/// The schema must be an object schema; property order in the document is
/// the positional order of the resulting table.
pub fn build_parameter_table(schema: &Value) -> Result<Vec<ParameterSpec>, ArgumentError> {
    let object = schema
        .as_object()
        .ok_or_else(|| ArgumentError::BadSchema("schema is not an object".to_string()))?;

    let properties = match object.get("properties") {
        Some(Value::Object(properties)) => properties,
        Some(_) => {
            return Err(ArgumentError::BadSchema(
                "properties is not an object".to_string(),
            ));
        }
        None => return Ok(Vec::new()),
    };

    let required: Vec<&str> = object
        .get("required")
        .and_then(|r| r.as_array())
        .map(|entries| entries.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    properties
        .iter()
        .map(|(name, declaration)| {
            Ok(ParameterSpec {
                name: name.clone(),
                required: required.contains(&name.as_str()),
                default: declaration.get("default").cloned(),
                kind: kind_of(declaration, name)?,
            })
        })
        .collect()
}

fn kind_of(declaration: &Value, name: &str) -> Result<ParameterKind, ArgumentError> {
    let declaration = declaration
        .as_object()
        .ok_or_else(|| ArgumentError::BadSchema(format!("property '{}' is not an object", name)))?;

    if let Some(variants) = declaration.get("enum").and_then(|e| e.as_array()) {
        let variants = variants
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect();
        return Ok(ParameterKind::Enum(variants));
    }

    let type_name = declaration.get("type").and_then(|t| t.as_str());
    match type_name {
        Some("boolean") => Ok(ParameterKind::Bool),
        Some("integer") => Ok(ParameterKind::Integer),
        Some("number") => Ok(ParameterKind::Number),
        Some("string") => {
            if declaration.get("format").and_then(|f| f.as_str()) == Some("date-time") {
                Ok(ParameterKind::DateTime)
            } else {
                Ok(ParameterKind::String)
            }
        }
        Some("array") => {
            let element = match declaration.get("items") {
                Some(items) => kind_of(items, name)?,
                None => ParameterKind::Any,
            };
            Ok(ParameterKind::Array(Box::new(element)))
        }
        Some("object") => {
            let discriminator = declaration
                .get("discriminator")
                .and_then(|d| d.as_object())
                .and_then(|d| {
                    let field = d.get("propertyName")?.as_str()?.to_string();
                    let known = d
                        .get("mapping")
                        .and_then(|m| m.as_object())
                        .map(|m| m.keys().cloned().collect())
                        .unwrap_or_default();
                    Some((field, known))
                });
            Ok(ParameterKind::Object { discriminator })
        }
        Some(other) => Err(ArgumentError::BadSchema(format!(
            "property '{}' has unsupported type '{}'",
            name, other
        ))),
        None => Ok(ParameterKind::Any),
    }
}

/// Resolve inbound arguments against a descriptor table.
///
/// Returns values in table order, ready to pass positionally to the
/// handler. Fails without partial results.
pub fn resolve_arguments(
    table: &[ParameterSpec],
    arguments: &Map<String, Value>,
) -> Result<Vec<ResolvedArgument>, ArgumentError> {
    table
        .iter()
        .map(|spec| match arguments.get(&spec.name) {
            Some(value) => decode(&spec.kind, value, &spec.name),
            None if spec.required => Err(ArgumentError::MissingArgument(spec.name.clone())),
            None => match &spec.default {
                Some(default) => decode(&spec.kind, default, &spec.name),
                None => Ok(ResolvedArgument::Null),
            },
        })
        .collect()
}

fn decode(
    kind: &ParameterKind,
    value: &Value,
    path: &str,
) -> Result<ResolvedArgument, ArgumentError> {
    let mismatch = || ArgumentError::TypeMismatch {
        path: path.to_string(),
        expected: kind.expected(),
        found: type_name(value).to_string(),
    };

    match kind {
        ParameterKind::Bool => value.as_bool().map(ResolvedArgument::Bool).ok_or_else(mismatch),
        ParameterKind::Integer => value
            .as_i64()
            .map(ResolvedArgument::Integer)
            .ok_or_else(mismatch),
        ParameterKind::Number => value
            .as_f64()
            .map(ResolvedArgument::Number)
            .ok_or_else(mismatch),
        ParameterKind::String => value
            .as_str()
            .map(|s| ResolvedArgument::String(s.to_string()))
            .ok_or_else(mismatch),
        ParameterKind::DateTime => {
            let text = value.as_str().ok_or_else(mismatch)?;
            DateTime::parse_from_rfc3339(text)
                .map(ResolvedArgument::DateTime)
                .map_err(|e| ArgumentError::InvalidDateTime(path.to_string(), e.to_string()))
        }
        ParameterKind::Enum(variants) => {
            let text = value.as_str().ok_or_else(mismatch)?;
            if variants.iter().any(|v| v == text) {
                Ok(ResolvedArgument::Enum(text.to_string()))
            } else {
                Err(ArgumentError::UnknownEnumVariant {
                    path: path.to_string(),
                    variant: text.to_string(),
                })
            }
        }
        ParameterKind::Array(element) => {
            let items = value.as_array().ok_or_else(mismatch)?;
            items
                .iter()
                .enumerate()
                .map(|(idx, item)| decode(element, item, &format!("{}[{}]", path, idx)))
                .collect::<Result<Vec<_>, _>>()
                .map(ResolvedArgument::Array)
        }
        ParameterKind::Object { discriminator } => {
            let object = value.as_object().ok_or_else(mismatch)?;
            if let Some((field, known)) = discriminator {
                let tag = object
                    .get(field)
                    .and_then(|t| t.as_str())
                    .ok_or_else(|| ArgumentError::UnknownDiscriminator {
                        path: path.to_string(),
                        value: format!("<missing field '{}'>", field),
                    })?;
                if !known.is_empty() && !known.iter().any(|k| k == tag) {
                    return Err(ArgumentError::UnknownDiscriminator {
                        path: path.to_string(),
                        value: tag.to_string(),
                    });
                }
            }
            Ok(ResolvedArgument::Object(value.clone()))
        }
        ParameterKind::Any => Ok(ResolvedArgument::Any(value.clone())),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
