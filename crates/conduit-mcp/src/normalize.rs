//! Flatten a tool result into the single string the model sees.

use crate::result::{ContentSegment, InvocationResult};
use serde_json::Value;

const EMPTY_RESULT: &str = "(empty tool result)";

/// Render `result` as text.
///
/// Text segments win and are joined with newlines. Without text, structured
/// payloads are pretty-printed instead. Without either, the raw result is
/// serialized so the model never receives an empty string.
pub fn normalize(result: &InvocationResult) -> String {
    let mut texts = Vec::new();
    let mut data = Vec::new();
    for segment in &result.segments {
        match segment {
            ContentSegment::Text(text) => texts.push(text.as_str()),
            ContentSegment::StructuredData(value) => data.push(value),
            _ => {}
        }
    }

    if !texts.is_empty() {
        return texts.join("\n");
    }

    if !data.is_empty() {
        let rendered: Result<Vec<String>, _> =
            data.iter().map(|v| serde_json::to_string_pretty(v)).collect();
        if let Ok(rendered) = rendered {
            return rendered.join("\n");
        }
    }

    raw_fallback(&result.raw)
}

fn raw_fallback(raw: &Value) -> String {
    let is_empty = match raw {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if is_empty {
        return EMPTY_RESULT.to_string();
    }
    serde_json::to_string(raw).unwrap_or_else(|_| EMPTY_RESULT.to_string())
}
