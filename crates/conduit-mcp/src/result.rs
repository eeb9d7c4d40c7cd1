//! Typed view of a `tools/call` result.

use serde_json::Value;

/// One element of a tool result's `content` array.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentSegment {
    /// Plain text content.
    Text(String),
    /// Machine-readable payload (embedded resources, `structuredContent`).
    StructuredData(Value),
    /// Any other content kind (images, audio, links), kept verbatim.
    Unknown(Value),
}

impl ContentSegment {
    /// Classify one content item by its `type` field.
    pub fn from_item(item: &Value) -> Self {
        match item.get("type").and_then(Value::as_str) {
            Some("text") => match item.get("text").and_then(Value::as_str) {
                Some(text) => ContentSegment::Text(text.to_string()),
                None => ContentSegment::Unknown(item.clone()),
            },
            Some("resource") => ContentSegment::StructuredData(
                item.get("resource").cloned().unwrap_or_else(|| item.clone()),
            ),
            _ => ContentSegment::Unknown(item.clone()),
        }
    }
}

/// The outcome of one remote tool call.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub segments: Vec<ContentSegment>,
    /// The server flagged the call as failed (`isError`).
    pub is_error: bool,
    pub request_id: u64,
    /// The unparsed `result` object.
    pub raw: Value,
}

impl InvocationResult {
    pub fn from_raw(request_id: u64, raw: Value) -> Self {
        let mut segments: Vec<ContentSegment> = raw
            .get("content")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(ContentSegment::from_item).collect())
            .unwrap_or_default();

        if let Some(structured) = raw.get("structuredContent") {
            if !structured.is_null() {
                segments.push(ContentSegment::StructuredData(structured.clone()));
            }
        }

        let is_error = raw
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Self {
            segments,
            is_error,
            request_id,
            raw,
        }
    }
}
