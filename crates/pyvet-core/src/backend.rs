//! Inference backend boundary.
//!
//! Stages talk to the model service only through [`InferenceBackend`].
//! The service is a single shared, memory-constrained process, so callers
//! wrap their client in [`SerializedBackend`] to keep at most one request
//! in flight.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AuditError, BackendError, Result};

/// One text-completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    /// Backend model identifier (e.g. `qwen2.5-coder:7b`).
    pub model: String,

    /// Fully rendered prompt.
    pub prompt: String,

    /// Per-call timeout.
    pub timeout: Duration,

    /// Ask the backend to keep the model resident after answering.
    pub keep_alive: bool,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            timeout,
            keep_alive: false,
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

/// Trait for text-completion backends (Ollama, in-memory fakes, ...).
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Complete `request.prompt` and return the raw response text.
    async fn generate(&self, request: &GenerateRequest) -> std::result::Result<String, BackendError>;
}

/// Wraps a backend so that only one request is in flight at a time.
pub struct SerializedBackend<B> {
    inner: B,
    permit: Mutex<()>,
}

impl<B: InferenceBackend> SerializedBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            permit: Mutex::new(()),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: InferenceBackend> InferenceBackend for SerializedBackend<B> {
    async fn generate(&self, request: &GenerateRequest) -> std::result::Result<String, BackendError> {
        let _permit = self.permit.lock().await;
        debug!(model = %request.model, prompt_chars = request.prompt.len(), "dispatching inference request");
        self.inner.generate(request).await
    }
}

/// Send `request` and lift backend failures into [`AuditError::BackendUnavailable`].
pub async fn dispatch(backend: &dyn InferenceBackend, request: &GenerateRequest) -> Result<String> {
    backend
        .generate(request)
        .await
        .map_err(|source| AuditError::BackendUnavailable {
            model: request.model.clone(),
            source,
        })
}
