//! HTTP client for OpenAI-compatible chat-completions endpoints.

use std::time::Duration;

use conduit_types::ApiError;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use crate::retry::{RetryConfig, is_retryable};
use crate::wire::{ChatRequest, ChatResponse};

/// Per-request timeout unless overridden.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Where chat-completions requests go and how they authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// OpenAI or any compatible server. Bearer auth.
    OpenAi { base_url: String },
    /// An Azure OpenAI deployment. `api-key` header auth.
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
}

impl Endpoint {
    pub fn openai(base_url: impl Into<String>) -> Self {
        Self::OpenAi {
            base_url: base_url.into(),
        }
    }

    pub fn azure(
        endpoint: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self::Azure {
            endpoint: endpoint.into(),
            deployment: deployment.into(),
            api_version: api_version.into(),
        }
    }

    /// Full URL of the chat-completions route.
    pub fn url(&self) -> String {
        match self {
            Self::OpenAi { base_url } => {
                let base = base_url.trim_end_matches('/');
                if base.ends_with("/v1") {
                    format!("{base}/chat/completions")
                } else {
                    format!("{base}/v1/chat/completions")
                }
            }
            Self::Azure {
                endpoint,
                deployment,
                api_version,
            } => format!(
                "{}/openai/deployments/{deployment}/chat/completions?api-version={api_version}",
                endpoint.trim_end_matches('/')
            ),
        }
    }

    /// Azure selects the model by deployment, so the body carries none.
    pub fn sends_model(&self) -> bool {
        matches!(self, Self::OpenAi { .. })
    }

    fn auth_header(&self, api_key: &str) -> Result<(HeaderName, HeaderValue), ApiError> {
        let invalid = |_| ApiError::Auth {
            message: "Invalid API key format".into(),
        };
        match self {
            Self::OpenAi { .. } => Ok((
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(invalid)?,
            )),
            Self::Azure { .. } => Ok((
                HeaderName::from_static("api-key"),
                HeaderValue::from_str(api_key).map_err(invalid)?,
            )),
        }
    }
}

/// Client for a chat-completions endpoint.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: Endpoint,
    retry_config: RetryConfig,
    timeout: Duration,
}

impl ChatClient {
    pub fn new(api_key: impl Into<String>, endpoint: Endpoint) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            endpoint,
            retry_config: RetryConfig::default(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Set the retry configuration for transient errors (429, 5xx, network).
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send one chat-completions request, retrying transient failures.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let url = self.endpoint.url();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let (name, value) = self.endpoint.auth_header(&self.api_key)?;
        headers.insert(name, value);

        let body = serde_json::to_string(request).map_err(|e| ApiError::BadRequest {
            message: format!("Failed to serialize request: {e}"),
        })?;

        let attempts = self.retry_config.attempts();
        let mut attempt = 0;
        loop {
            tracing::debug!("POST {url} (attempt {}/{attempts})", attempt + 1);

            let result = self
                .http
                .post(&url)
                .headers(headers.clone())
                .timeout(self.timeout)
                .body(body.clone())
                .send()
                .await;

            let (err, retry_after) = match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let text = response
                            .text()
                            .await
                            .map_err(|e| ApiError::Network(e.to_string()))?;
                        return serde_json::from_str(&text).map_err(|e| {
                            ApiError::InvalidResponse(format!(
                                "{e}: {}",
                                conduit_types::truncate_str(&text, 200)
                            ))
                        });
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body_text = response.text().await.unwrap_or_default();
                    (
                        classify_error(status.as_u16(), &body_text, retry_after),
                        retry_after,
                    )
                }
                Err(e) if e.is_timeout() => (ApiError::Timeout, None),
                Err(e) => (ApiError::Network(e.to_string()), None),
            };

            if !is_retryable(&err) || attempt + 1 >= attempts {
                return Err(err);
            }

            let delay = self.retry_config.delay(attempt, retry_after);
            tracing::warn!(
                "Retryable API error (attempt {}/{attempts}): {err}. Retrying in {}ms...",
                attempt + 1,
                delay.as_millis(),
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Parse the `retry-after` header value as seconds and convert to milliseconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as u64)
}

/// Classify an HTTP error response into a typed ApiError.
fn classify_error(status: u16, body: &str, retry_after: Option<u64>) -> ApiError {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: Option<ErrorDetail>,
    }
    #[derive(serde::Deserialize)]
    struct ErrorDetail {
        message: Option<String>,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.to_string());

    match status {
        401 | 403 => ApiError::Auth { message },
        400 | 404 | 422 => ApiError::BadRequest { message },
        429 => ApiError::RateLimited {
            retry_after_ms: retry_after,
        },
        _ => ApiError::Server { status, message },
    }
}
