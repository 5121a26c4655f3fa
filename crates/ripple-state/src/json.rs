#![forbid(unsafe_code)]

//! Small JSON helpers shared by `patch` and collection updates.

use serde_json::{Map, Value};

use ripple_core::{Result, RippleError};

pub(crate) fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn expect_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(RippleError::InvalidChanges {
            found: kind(&other),
        }),
    }
}

/// Shallow merge of `changes` into `target`. Keys missing from `target` are
/// only added with `add_new_properties`.
pub(crate) fn merge(
    target: &mut Map<String, Value>,
    changes: Map<String, Value>,
    add_new_properties: bool,
) {
    for (key, value) in changes {
        if add_new_properties || target.contains_key(&key) {
            target.insert(key, value);
        }
    }
}
