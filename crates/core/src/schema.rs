use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ScrapelineError;

/// Description of the output an extraction job should produce.
///
/// Either a structural schema (JSON Schema or the field-map shorthand such as
/// `{"title": ["string"]}`) or a free-form natural-language prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractionSchema {
    Prompt(String),
    Structured(Value),
}

impl ExtractionSchema {
    /// Reject schemas that cannot drive an extraction.
    pub fn ensure_usable(&self) -> Result<(), ScrapelineError> {
        match self {
            Self::Prompt(text) if text.trim().is_empty() => {
                Err(ScrapelineError::InvalidSchema("schema prompt is empty".into()))
            }
            Self::Prompt(_) => Ok(()),
            Self::Structured(Value::Object(map)) if map.is_empty() => {
                Err(ScrapelineError::InvalidSchema("schema object is empty".into()))
            }
            Self::Structured(Value::Object(_)) => Ok(()),
            Self::Structured(other) => Err(ScrapelineError::InvalidSchema(format!(
                "schema must be a string or an object, got {}",
                json_kind(other)
            ))),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured(_))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Prompt(_) => None,
        }
    }

    /// Canonical serialization: object keys sorted recursively, prompts trimmed.
    pub fn canonical(&self) -> String {
        match self {
            Self::Prompt(text) => text.trim().to_string(),
            Self::Structured(value) => canonical_json(value).to_string(),
        }
    }
}

/// Rebuild `value` with every object's keys in sorted order.
pub fn canonical_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonical_json(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}

/// Human-readable JSON type name.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
