//! Error taxonomy for the audit pipeline.

use std::path::PathBuf;
use std::time::Duration;

/// Why a call into the inference backend produced no response.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode backend response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Timeouts and connection failures may succeed on another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Timeout(_) | BackendError::Connection(_))
    }
}

/// Errors surfaced by the audit engine.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("inference backend unavailable for model {model}: {source}")]
    BackendUnavailable {
        model: String,
        #[source]
        source: BackendError,
    },

    #[error("path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to load prompt template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuditError {
    /// Whether this error came from the inference backend.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, AuditError::BackendUnavailable { .. })
    }
}

/// Result type for audit engine operations.
pub type Result<T> = std::result::Result<T, AuditError>;
