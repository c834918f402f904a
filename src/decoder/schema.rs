//! Validation for the JSON Schema subset used by structured output.
//!
//! Supported keywords: `type` (single or list), `nullable`, `properties`, `required`,
//! `additionalProperties` (boolean or schema), `items`, `enum`, `minItems`,
//! `maxItems`, `minLength`, `maxLength`. Unknown keywords are ignored.

use serde_json::{Map, Value};

/// Validate `value` against `schema`, collecting every violation with its path.
pub fn validate(value: &Value, schema: &Value) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    check(value, schema, "$", &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// The one tolerated mismatch: a single-element list where the root schema expects an
/// object. Returns the unwrapped element, or `None` when the repair does not apply.
pub fn unwrap_single_element_list(value: &Value, schema: &Value) -> Option<Value> {
    if !expects_object(schema) {
        return None;
    }
    match value.as_array().map(Vec::as_slice) {
        Some([only]) if only.is_object() => Some(only.clone()),
        _ => None,
    }
}

fn expects_object(schema: &Value) -> bool {
    match schema.get("type") {
        Some(Value::String(kind)) => kind == "object",
        Some(Value::Array(kinds)) => kinds.iter().any(|k| k == "object"),
        _ => schema.get("properties").is_some(),
    }
}

fn check(value: &Value, schema: &Value, path: &str, errors: &mut Vec<String>) {
    let Some(schema) = schema.as_object() else {
        // `true` / `{}`-like schemas accept anything; `false` accepts nothing.
        if schema == &Value::Bool(false) {
            errors.push(format!("{}: no value is allowed here", path));
        }
        return;
    };

    if value.is_null() && schema.get("nullable").and_then(Value::as_bool) == Some(true) {
        return;
    }

    if let Some(expected) = schema.get("type") {
        if !type_matches(value, expected) {
            errors.push(format!(
                "{}: expected {}, found {}",
                path,
                describe_type(expected),
                type_name(value)
            ));
            return;
        }
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            errors.push(format!("{}: {} is not one of the allowed values", path, value));
        }
    }

    match value {
        Value::Object(object) => check_object(object, schema, path, errors),
        Value::Array(items) => check_array(items, schema, path, errors),
        Value::String(text) => {
            let length = text.chars().count() as u64;
            if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
                if length < min {
                    errors.push(format!("{}: shorter than {} characters", path, min));
                }
            }
            if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
                if length > max {
                    errors.push(format!("{}: longer than {} characters", path, max));
                }
            }
        }
        _ => {}
    }
}

fn check_object(
    object: &Map<String, Value>,
    schema: &Map<String, Value>,
    path: &str,
    errors: &mut Vec<String>,
) {
    if let Some(Value::Array(required)) = schema.get("required") {
        for name in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(name) {
                errors.push(format!("{}: missing required property '{}'", path, name));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    for (name, child) in object {
        let child_path = format!("{}.{}", path, name);
        match properties.and_then(|p| p.get(name)) {
            Some(child_schema) => check(child, child_schema, &child_path, errors),
            None => match schema.get("additionalProperties") {
                Some(Value::Bool(false)) => {
                    errors.push(format!("{}: unexpected property '{}'", path, name));
                }
                Some(extra) if extra.is_object() => check(child, extra, &child_path, errors),
                _ => {}
            },
        }
    }
}

fn check_array(items: &[Value], schema: &Map<String, Value>, path: &str, errors: &mut Vec<String>) {
    let len = items.len() as u64;
    if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
        if len < min {
            errors.push(format!("{}: expected at least {} items, found {}", path, min, len));
        }
    }
    if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
        if len > max {
            errors.push(format!("{}: expected at most {} items, found {}", path, max, len));
        }
    }
    if let Some(item_schema) = schema.get("items") {
        for (index, item) in items.iter().enumerate() {
            check(item, item_schema, &format!("{}[{}]", path, index), errors);
        }
    }
}

fn type_matches(value: &Value, expected: &Value) -> bool {
    match expected {
        Value::String(kind) => single_type_matches(value, kind),
        Value::Array(kinds) => kinds
            .iter()
            .filter_map(Value::as_str)
            .any(|kind| single_type_matches(value, kind)),
        _ => true,
    }
}

fn single_type_matches(value: &Value, kind: &str) -> bool {
    match kind {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
        }
        _ => false,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::Array(kinds) => kinds
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        other => other.as_str().unwrap_or("any").to_string(),
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
