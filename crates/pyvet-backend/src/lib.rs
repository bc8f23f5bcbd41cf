//! pyvet-backend: HTTP inference client
//!
//! Implements [`pyvet_core::InferenceBackend`] against an Ollama service,
//! with bounded retries on transient failures.

pub mod ollama;
pub mod retry;

pub use ollama::{ClientError, OllamaClient};
pub use retry::{with_retry, RetryPolicy};
