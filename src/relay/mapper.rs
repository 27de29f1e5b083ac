//! Normalization of resolved output into a single completion string.

use serde_json::Value;

use crate::cli::ExtractedValue;

/// Fields probed for the completion text, highest priority first.
pub const COMPLETION_FIELDS: [&str; 5] = ["result", "completion", "content", "output", "response"];

/// Extract the canonical completion string from a resolved value.
///
/// Objects are probed in [`COMPLETION_FIELDS`] order and the first present,
/// non-null field wins. Raw text passes through unchanged. An object with
/// none of the fields maps to an empty string.
#[must_use]
pub fn map_completion(value: &ExtractedValue) -> String {
    match value {
        ExtractedValue::Raw(text) => text.clone(),
        ExtractedValue::Json(Value::Object(map)) => COMPLETION_FIELDS
            .iter()
            .find_map(|field| map.get(*field).filter(|v| !v.is_null()))
            .map(value_to_text)
            .unwrap_or_default(),
        ExtractedValue::Json(other) => value_to_text(other),
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
