//! Recursive normalisation of JSON-encoded strings inside a value tree.
//!
//! Flowise frequently double-encodes tool inputs/outputs and agent state as
//! strings. `unwrap_value` replaces every string that looks like a JSON
//! object or array with its parsed form, at any depth.

use serde_json::Value;

use crate::event::Payload;

/// Returns `value` with every embedded JSON object/array string parsed.
///
/// Strings that fail to parse are kept as-is. The result is a fixpoint:
/// applying the function again returns an equal value.
pub fn unwrap_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, unwrap_value(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(unwrap_value).collect()),
        Value::String(text) => match parse_embedded(&text) {
            Some(parsed) => unwrap_value(parsed),
            None => Value::String(text),
        },
        other => other,
    }
}

/// Parses a text payload that holds a JSON object or array.
///
/// Only the outer layer is decoded: strings nested inside the result keep
/// their encoded form until [`unwrap_value`] is applied to them.
pub fn unwrap_payload(payload: &Payload) -> Payload {
    match payload {
        Payload::Text(text) => parse_embedded(text)
            .map(Payload::from)
            .unwrap_or_else(|| payload.clone()),
        other => other.clone(),
    }
}

fn parse_embedded(text: &str) -> Option<Value> {
    if !looks_like_json(text) {
        return None;
    }
    serde_json::from_str(text.trim()).ok()
}

fn looks_like_json(text: &str) -> bool {
    let trimmed = text.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
}
