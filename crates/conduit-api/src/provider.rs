//! Chat-completions provider implementation.

use crate::client::{ChatClient, Endpoint};
use crate::retry::RetryConfig;
use crate::wire::ChatRequest;
use conduit_types::provider::{CompletionFuture, Provider};
use conduit_types::{ApiError, Message, ToolDefinition};
use std::time::Duration;

/// Provider backed by an OpenAI or Azure OpenAI chat-completions endpoint.
///
/// Builds a request from the transcript and catalog on every call; retry
/// logic stays in [`ChatClient`].
#[derive(Clone)]
pub struct OpenAiProvider {
    client: ChatClient,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl OpenAiProvider {
    pub fn new(
        api_key: impl Into<String>,
        endpoint: Endpoint,
        model: impl Into<String>,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            client: ChatClient::new(api_key, endpoint)?,
            model: model.into(),
            max_tokens: None,
            temperature: None,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.client = self.client.with_retry_config(config);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = self.client.with_timeout(timeout);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, transcript: &[Message], tools: &[ToolDefinition]) -> ChatRequest {
        let model = self
            .client
            .endpoint()
            .sends_model()
            .then(|| self.model.clone());
        ChatRequest {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            ..ChatRequest::new(model, transcript, tools)
        }
    }
}

impl Provider for OpenAiProvider {
    fn complete<'a>(
        &'a self,
        transcript: &'a [Message],
        tools: &'a [ToolDefinition],
    ) -> CompletionFuture<'a> {
        Box::pin(async move {
            let request = self.build_request(transcript, tools);
            let response = self.client.chat(&request).await?;
            let completion = response.into_completion()?;
            tracing::debug!(
                tool_calls = completion.tool_calls.len(),
                input_tokens = completion.usage.input_tokens,
                output_tokens = completion.usage.output_tokens,
                "completion received"
            );
            Ok(completion)
        })
    }

    fn name(&self) -> &str {
        match self.client.endpoint() {
            Endpoint::OpenAi { .. } => "openai",
            Endpoint::Azure { .. } => "azure-openai",
        }
    }
}
