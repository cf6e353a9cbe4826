//! JSON Schema validation for extracted data.
//!
//! Supports the subset extraction schemas use in practice: `type`,
//! `properties`, `required`, `items`, `enum` and `additionalProperties`.
//! Field-map shorthand such as `{"title": ["string"]}` is expanded into an
//! equivalent schema whose fields are all optional and nullable.

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use scrapeline_core::schema::json_kind;
use scrapeline_core::ExtractionSchema;

use crate::traits::{SchemaValidator, ValidationReport};

const JSON_TYPES: &[&str] = &["string", "number", "integer", "boolean", "object", "array", "null"];

const SCHEMA_KEYWORDS: &[&str] = &[
    "$schema", "$id", "$defs", "definitions", "type", "properties", "required", "items",
    "enum", "const", "additionalProperties", "title", "description", "default", "examples",
    "format", "pattern", "minimum", "maximum", "minLength", "maxLength", "minItems", "maxItems",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaValidator;

impl JsonSchemaValidator {
    pub fn new() -> Self {
        Self
    }
}

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, data: &Value, schema: &ExtractionSchema) -> ValidationReport {
        if !data.is_object() {
            return ValidationReport::invalid(vec![format!(
                "Data must be an object, got {}",
                json_kind(data)
            )]);
        }

        let raw = match schema {
            ExtractionSchema::Prompt(_) => return ValidationReport::ok(),
            ExtractionSchema::Structured(raw) => raw,
        };
        let Some(map) = raw.as_object() else {
            return ValidationReport::invalid(vec![format!(
                "Schema must be an object, got {}",
                json_kind(raw)
            )]);
        };
        if map.is_empty() {
            return ValidationReport::invalid(vec!["Schema cannot be empty".into()]);
        }

        let schema = expand_schema(map);
        if let Err(e) = check_schema(&schema) {
            warn!(error = %e, "invalid extraction schema");
            return ValidationReport::invalid(vec![format!("Invalid JSON Schema: {e}")]);
        }

        let mut errors = Vec::new();
        let mut path = Vec::new();
        validate_node(data, &schema, &mut path, &mut errors);

        if errors.is_empty() {
            debug!("data validation passed");
        } else {
            warn!(error_count = errors.len(), first_error = %errors[0], "data validation failed");
        }
        ValidationReport::invalid(errors)
    }
}

// ── Schema expansion ─────────────────────────────────────────────────

/// Whether `map` is already a JSON Schema rather than a field map.
fn is_json_schema(map: &Map<String, Value>) -> bool {
    if map.contains_key("$schema") || map.get("properties").is_some_and(Value::is_object) {
        return true;
    }
    let valid_type = match map.get("type") {
        Some(Value::String(t)) => JSON_TYPES.contains(&t.as_str()),
        Some(Value::Array(ts)) => ts.iter().all(|t| t.as_str().is_some_and(|t| JSON_TYPES.contains(&t))),
        _ => false,
    };
    valid_type && map.keys().all(|k| SCHEMA_KEYWORDS.contains(&k.as_str()))
}

fn expand_schema(map: &Map<String, Value>) -> Value {
    if is_json_schema(map) {
        return Value::Object(map.clone());
    }
    let properties: Map<String, Value> = map
        .iter()
        .map(|(name, spec)| (name.clone(), field_schema(spec)))
        .collect();
    json!({"type": "object", "properties": properties})
}

fn field_schema(spec: &Value) -> Value {
    match spec {
        Value::String(name) => match shorthand_type(name) {
            Some(t) => json!({"type": [t, "null"]}),
            // Free-text field descriptions constrain nothing.
            None => json!({}),
        },
        Value::Array(items) => match items.first() {
            Some(item) => json!({"type": ["array", "null"], "items": field_schema(item)}),
            None => json!({"type": ["array", "null"]}),
        },
        Value::Object(map) if is_json_schema(map) => spec.clone(),
        Value::Object(map) => {
            let properties: Map<String, Value> = map
                .iter()
                .map(|(name, spec)| (name.clone(), field_schema(spec)))
                .collect();
            json!({"type": ["object", "null"], "properties": properties})
        }
        _ => json!({}),
    }
}

fn shorthand_type(name: &str) -> Option<&'static str> {
    let t = match name.trim().to_ascii_lowercase().as_str() {
        "string" | "str" | "text" | "date" | "datetime" | "url" => "string",
        "number" | "float" | "decimal" => "number",
        "integer" | "int" => "integer",
        "boolean" | "bool" => "boolean",
        "object" => "object",
        "array" | "list" => "array",
        "null" => "null",
        _ => return None,
    };
    Some(t)
}

/// Reject schemas whose keywords have the wrong shape.
fn check_schema(schema: &Value) -> Result<(), String> {
    let Some(map) = schema.as_object() else {
        return Ok(());
    };

    if let Some(t) = map.get("type") {
        let names: Vec<&Value> = match t {
            Value::Array(ts) => ts.iter().collect(),
            other => vec![other],
        };
        for name in names {
            match name.as_str() {
                Some(n) if JSON_TYPES.contains(&n) => {}
                _ => return Err(format!("{name} is not a valid type")),
            }
        }
    }
    if let Some(required) = map.get("required") {
        if !required.as_array().is_some_and(|r| r.iter().all(Value::is_string)) {
            return Err(format!("{required} is not a list of property names"));
        }
    }
    if let Some(values) = map.get("enum") {
        if !values.is_array() {
            return Err(format!("{values} is not of type 'array'"));
        }
    }
    if let Some(properties) = map.get("properties") {
        let Some(properties) = properties.as_object() else {
            return Err(format!("{properties} is not of type 'object'"));
        };
        for sub in properties.values() {
            check_schema(sub)?;
        }
    }
    if let Some(items) = map.get("items") {
        check_schema(items)?;
    }
    if let Some(extra) = map.get("additionalProperties") {
        check_schema(extra)?;
    }
    Ok(())
}

// ── Validation ───────────────────────────────────────────────────────

fn validate_node(value: &Value, schema: &Value, path: &mut Vec<String>, errors: &mut Vec<String>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema.get("type") {
        if !type_matches(value, expected) {
            errors.push(format_error(
                path,
                &format!("{value} is not of type {}", quoted_types(expected)),
                &format!(" (expected {}, got {})", expected_label(expected), json_kind(value)),
            ));
            return;
        }
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            let allowed = Value::Array(allowed.clone());
            errors.push(format_error(
                path,
                &format!("{value} is not one of {allowed}"),
                &format!(" (must be one of {allowed})"),
            ));
        }
    }

    match value {
        Value::Object(fields) => validate_object(fields, schema, path, errors),
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (idx, item) in items.iter().enumerate() {
                    path.push(idx.to_string());
                    validate_node(item, item_schema, path, errors);
                    path.pop();
                }
            }
        }
        _ => {}
    }
}

fn validate_object(
    fields: &Map<String, Value>,
    schema: &Map<String, Value>,
    path: &mut Vec<String>,
    errors: &mut Vec<String>,
) {
    if let Some(Value::Array(required)) = schema.get("required") {
        for name in required.iter().filter_map(Value::as_str) {
            if !fields.contains_key(name) {
                errors.push(format_error(
                    path,
                    &format!("'{name}' is a required property"),
                    " (missing required field)",
                ));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    for (name, value) in fields {
        match properties.and_then(|p| p.get(name)) {
            Some(sub) => {
                path.push(name.clone());
                validate_node(value, sub, path, errors);
                path.pop();
            }
            None => match schema.get("additionalProperties") {
                Some(Value::Bool(false)) => errors.push(format_error(
                    path,
                    &format!("Additional properties are not allowed ('{name}' was unexpected)"),
                    "",
                )),
                Some(extra @ Value::Object(_)) => {
                    path.push(name.clone());
                    validate_node(value, extra, path, errors);
                    path.pop();
                }
                _ => {}
            },
        }
    }
}

fn type_matches(value: &Value, expected: &Value) -> bool {
    match expected {
        Value::String(t) => is_type(value, t),
        Value::Array(ts) => ts.iter().filter_map(Value::as_str).any(|t| is_type(value, t)),
        _ => true,
    }
}

fn is_type(value: &Value, t: &str) -> bool {
    match t {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
            _ => false,
        },
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => false,
    }
}

fn quoted_types(expected: &Value) -> String {
    match expected {
        Value::Array(ts) => ts
            .iter()
            .filter_map(Value::as_str)
            .map(|t| format!("'{t}'"))
            .collect::<Vec<_>>()
            .join(", "),
        Value::String(t) => format!("'{t}'"),
        other => other.to_string(),
    }
}

fn expected_label(expected: &Value) -> String {
    match expected {
        Value::String(t) => t.clone(),
        other => other.to_string(),
    }
}

fn format_error(path: &[String], message: &str, hint: &str) -> String {
    if path.is_empty() {
        format!("Root level: {message}{hint}")
    } else {
        format!("{}: {message}{hint}", path.join(" -> "))
    }
}
