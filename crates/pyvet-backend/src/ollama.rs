//! Ollama `/api/generate` client
//!
//! Sends non-streaming completion requests and returns the `response`
//! field. Timeouts and connection failures are retried according to the
//! configured [`RetryPolicy`]; HTTP status and decode failures are not.

use async_trait::async_trait;
use pyvet_core::config::BackendConfig;
use pyvet_core::{BackendError, GenerateRequest, InferenceBackend};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::retry::{with_retry, RetryPolicy};

const GENERATE_PATH: &str = "/api/generate";

/// Keep-alive value asking the service to hold the model in memory.
const KEEP_ALIVE_RESIDENT: &str = "5m";

/// Error bodies longer than this are cut in [`BackendError::Status`].
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Errors constructing an [`OllamaClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),

    #[error("invalid backend host: {0:?}")]
    InvalidHost(String),
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_ctx: u32,
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
    keep_alive: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// HTTP client for a single Ollama service.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    endpoint: String,
    temperature: f32,
    num_ctx: u32,
    retry: RetryPolicy,
}

impl OllamaClient {
    pub fn from_config(config: &BackendConfig) -> Result<Self, ClientError> {
        let host = config.host.trim();
        if host.is_empty() {
            return Err(ClientError::InvalidHost(config.host.clone()));
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("pyvet/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint: generate_endpoint(host),
            temperature: config.temperature,
            num_ctx: config.num_ctx,
            retry: RetryPolicy::from_config(config),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn body<'a>(&self, request: &'a GenerateRequest) -> GenerateBody<'a> {
        GenerateBody {
            model: &request.model,
            prompt: &request.prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_ctx: self.num_ctx,
            },
            keep_alive: if request.keep_alive {
                serde_json::Value::from(KEEP_ALIVE_RESIDENT)
            } else {
                serde_json::Value::from(0)
            },
        }
    }

    async fn send_once(&self, request: &GenerateRequest) -> Result<String, BackendError> {
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(request.timeout)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| map_request_error(e, request))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| map_request_error(e, request))?;

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: truncate_chars(&text, MAX_ERROR_BODY_CHARS),
            });
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl InferenceBackend for OllamaClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, BackendError> {
        debug!(endpoint = %self.endpoint, model = %request.model, timeout_secs = request.timeout.as_secs(), "POST generate");
        with_retry(self.retry, |_| self.send_once(request)).await
    }
}

/// Resolve the generate URL from a host that may already include the path.
pub fn generate_endpoint(host: &str) -> String {
    let host = host.trim();
    if host.ends_with(GENERATE_PATH) {
        host.to_string()
    } else {
        format!("{}{}", host.trim_end_matches('/'), GENERATE_PATH)
    }
}

fn map_request_error(err: reqwest::Error, request: &GenerateRequest) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(request.timeout)
    } else if err.is_decode() {
        BackendError::Decode(err.to_string())
    } else {
        BackendError::Connection(err.to_string())
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
