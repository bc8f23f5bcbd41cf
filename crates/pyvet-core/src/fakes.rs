//! In-memory fakes for the backend and analyzer traits (testing only)
//!
//! Provides `ScriptedBackend` and `FixedAnalyzer`, which satisfy the trait
//! contracts without a model service or an analyzer binary.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::{GenerateRequest, InferenceBackend};
use crate::error::BackendError;
use crate::static_check::{Diagnostic, StaticAnalyzer, StaticToolError};

type Scripted = Result<String, BackendError>;

// ---------------------------------------------------------------------------
// ScriptedBackend
// ---------------------------------------------------------------------------

/// Backend answering from per-model scripts.
///
/// Each model has a queue of replies consumed in order; the last reply is
/// repeated once the queue is down to one entry. Models without a script
/// get the default reply, or a connection error when none is set.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    default_reply: Option<String>,
    calls: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `reply` for `model`.
    pub fn respond(self, model: &str, reply: impl Into<String>) -> Self {
        self.push(model, Ok(reply.into()));
        self
    }

    /// Queue a connection failure for `model`.
    pub fn fail(self, model: &str) -> Self {
        self.push(
            model,
            Err(BackendError::Connection("scripted failure".to_string())),
        );
        self
    }

    /// Reply used for models without a script.
    pub fn with_default(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = Some(reply.into());
        self
    }

    fn push(&self, model: &str, reply: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Every request received, in order.
    pub fn calls(&self) -> Vec<GenerateRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Requests received for `model`.
    pub fn calls_for(&self, model: &str) -> Vec<GenerateRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.model == model)
            .collect()
    }
}

fn replay(reply: &Scripted) -> Scripted {
    match reply {
        Ok(text) => Ok(text.clone()),
        Err(BackendError::Timeout(d)) => Err(BackendError::Timeout(*d)),
        Err(BackendError::Connection(msg)) => Err(BackendError::Connection(msg.clone())),
        Err(BackendError::Status { status, body }) => Err(BackendError::Status {
            status: *status,
            body: body.clone(),
        }),
        Err(BackendError::Decode(msg)) => Err(BackendError::Decode(msg.clone())),
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, BackendError> {
        self.calls.lock().unwrap().push(request.clone());

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&request.model) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| {
                Err(BackendError::Connection("script exhausted".to_string()))
            }),
            Some(queue) => match queue.front() {
                Some(reply) => replay(reply),
                None => Err(BackendError::Connection("script exhausted".to_string())),
            },
            None => match &self.default_reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(BackendError::Connection(format!(
                    "no script for model {}",
                    request.model
                ))),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// FixedAnalyzer
// ---------------------------------------------------------------------------

/// Analyzer returning the same diagnostics for every path.
#[derive(Debug, Default)]
pub struct FixedAnalyzer {
    diagnostics: Option<Vec<Diagnostic>>,
    paths: Mutex<Vec<PathBuf>>,
}

impl FixedAnalyzer {
    pub fn new(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            diagnostics: Some(diagnostics),
            paths: Mutex::new(Vec::new()),
        }
    }

    /// No diagnostics.
    pub fn clean() -> Self {
        Self::new(Vec::new())
    }

    /// Always reports the analyzer as unavailable.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Paths analyzed, in order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl StaticAnalyzer for FixedAnalyzer {
    async fn analyze(&self, path: &Path) -> Result<Vec<Diagnostic>, StaticToolError> {
        self.paths.lock().unwrap().push(path.to_path_buf());
        match &self.diagnostics {
            Some(diagnostics) => Ok(diagnostics.clone()),
            None => Err(StaticToolError::Unavailable {
                program: "fixed".to_string(),
                reason: "not installed".to_string(),
            }),
        }
    }
}
