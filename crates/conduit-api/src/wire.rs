//! Chat-completions wire format and its mapping to transcript types.

use conduit_types::{ApiError, Completion, Message, ToolCall, ToolDefinition, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for `POST .../chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMessage {
    pub role: &'static str,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: WireFunctionCall,
}

/// Function name plus its arguments as a JSON-encoded string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireFunction,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

impl ChatRequest {
    pub fn new(model: Option<String>, transcript: &[Message], tools: &[ToolDefinition]) -> Self {
        Self {
            model,
            messages: transcript.iter().map(WireMessage::from_message).collect(),
            tools: tools.iter().map(WireTool::from_definition).collect(),
            max_tokens: None,
            temperature: None,
        }
    }
}

impl WireMessage {
    fn from_message(message: &Message) -> Self {
        let plain = |role, content: &str| WireMessage {
            role,
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        };
        match message {
            Message::System { content } => plain("system", content),
            Message::User { content } => plain("user", content),
            Message::Assistant {
                content,
                tool_calls,
            } => WireMessage {
                role: "assistant",
                content: content.clone(),
                tool_calls: tool_calls.iter().map(WireToolCall::from_call).collect(),
                tool_call_id: None,
            },
            Message::ToolResult {
                tool_call_id,
                content,
                ..
            } => WireMessage {
                tool_call_id: Some(tool_call_id.clone()),
                ..plain("tool", content)
            },
        }
    }
}

impl WireToolCall {
    fn from_call(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            kind: function_kind(),
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.to_string(),
            },
        }
    }

    /// Convert a model-issued call, tolerating sloppy output.
    ///
    /// Arguments that are not valid JSON become `{}`; a missing id is
    /// replaced with a generated `call_<uuid>`.
    fn into_call(self) -> ToolCall {
        let arguments = if self.function.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&self.function.arguments) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(
                        tool = %self.function.name,
                        "unparsable tool arguments ({e}), using {{}}: {}",
                        conduit_types::truncate_str(&self.function.arguments, 200)
                    );
                    Value::Object(Default::default())
                }
            }
        };
        let id = if self.id.is_empty() {
            format!("call_{}", uuid::Uuid::new_v4().simple())
        } else {
            self.id
        };
        ToolCall {
            id,
            name: self.function.name,
            arguments,
        }
    }
}

impl WireTool {
    fn from_definition(def: &ToolDefinition) -> Self {
        Self {
            kind: "function",
            function: WireFunction {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters: def.input_schema.clone(),
            },
        }
    }
}

impl ChatResponse {
    /// Reduce the first choice to a [`Completion`].
    pub fn into_completion(self) -> Result<Completion, ApiError> {
        let usage = self
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::InvalidResponse("response has no choices".to_string()))?;

        if let Some(reason) = &choice.finish_reason {
            tracing::debug!("finish_reason: {reason}");
        }

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(WireToolCall::into_call)
            .collect();

        Ok(Completion {
            text: choice.message.content.filter(|t| !t.is_empty()),
            tool_calls,
            usage,
        })
    }
}
