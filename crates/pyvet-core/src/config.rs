//! Runtime configuration.
//!
//! Every section has defaults, so an empty (or absent) TOML file yields a
//! working setup against a local Ollama instance. Environment variables
//! are applied on top of the file; CLI flags are applied last by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};
use crate::stage::StageKind;

/// Environment variable overriding [`BackendConfig::host`].
pub const ENV_OLLAMA_HOST: &str = "OLLAMA_HOST";

/// Environment variable overriding [`PathConfig::prompt_dir`].
pub const ENV_PROMPT_DIR: &str = "PYVET_PROMPT_DIR";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuditConfig {
    pub backend: BackendConfig,
    pub models: ModelConfig,
    pub timeouts: TimeoutConfig,
    pub limits: LimitConfig,
    pub static_check: StaticCheckConfig,
    pub paths: PathConfig,
}

/// Inference service connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the Ollama service.
    pub host: String,

    /// Sampling temperature sent with every request.
    pub temperature: f32,

    /// Context window (`num_ctx`) sent with every request.
    pub num_ctx: u32,

    /// Keep the model loaded between requests.
    pub keep_alive: bool,

    /// Attempts per request, including the first one.
    pub max_attempts: u32,

    /// Lower clamp for the exponential backoff.
    pub backoff_min_secs: u64,

    /// Upper clamp for the exponential backoff.
    pub backoff_max_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            temperature: 0.2,
            num_ctx: 4096,
            keep_alive: false,
            max_attempts: 3,
            backoff_min_secs: 4,
            backoff_max_secs: 10,
        }
    }
}

/// Backend model identifier per stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub syntax: String,
    pub logic: String,
    pub performance: String,
    pub fix: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            syntax: "qwen2.5-coder:3b".to_string(),
            logic: "deepseek-r1:7b".to_string(),
            performance: "qwen2.5-coder:7b".to_string(),
            fix: "qwen2.5-coder:7b".to_string(),
        }
    }
}

impl ModelConfig {
    pub fn for_stage(&self, kind: StageKind) -> &str {
        match kind {
            StageKind::Syntax => &self.syntax,
            StageKind::Logic => &self.logic,
            StageKind::Performance => &self.performance,
        }
    }
}

/// Per-call timeouts in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub syntax_secs: u64,
    pub logic_secs: u64,
    pub performance_secs: u64,
    pub fix_secs: u64,
    pub static_check_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            syntax_secs: 30,
            logic_secs: 480,
            performance_secs: 120,
            fix_secs: 240,
            static_check_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn for_stage(&self, kind: StageKind) -> Duration {
        let secs = match kind {
            StageKind::Syntax => self.syntax_secs,
            StageKind::Logic => self.logic_secs,
            StageKind::Performance => self.performance_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn fix(&self) -> Duration {
        Duration::from_secs(self.fix_secs)
    }

    pub fn static_check(&self) -> Duration {
        Duration::from_secs(self.static_check_secs)
    }
}

/// Input-size limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Character budget for the joined logic-review input.
    pub logic_max_chars: usize,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            logic_max_chars: 6000,
        }
    }
}

/// External static analyzer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticCheckConfig {
    pub enabled: bool,

    /// Analyzer executable.
    pub program: String,

    /// Diagnostic categories passed to `--select`.
    pub select: Vec<String>,
}

impl Default for StaticCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "ruff".to_string(),
            select: crate::static_check::DEFAULT_SELECT
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Directory holding prompt template overrides; built-ins are used when unset.
    pub prompt_dir: Option<PathBuf>,

    /// Directory receiving audit reports.
    pub report_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            prompt_dir: None,
            report_dir: PathBuf::from("reports"),
        }
    }
}

impl AuditConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AuditConfig =
            toml::from_str(text).map_err(|e| AuditError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AuditError::PathNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_OLLAMA_HOST).filter(|v| !v.trim().is_empty()) {
            self.backend.host = host.trim().to_string();
        }
        if let Some(dir) = lookup(ENV_PROMPT_DIR).filter(|v| !v.trim().is_empty()) {
            self.paths.prompt_dir = Some(PathBuf::from(dir.trim()));
        }
        self
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.backend.host.trim().is_empty() {
            return Err(AuditError::Config("backend.host must not be empty".to_string()));
        }
        if self.backend.max_attempts == 0 {
            return Err(AuditError::Config(
                "backend.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backend.backoff_min_secs > self.backend.backoff_max_secs {
            return Err(AuditError::Config(
                "backend.backoff_min_secs exceeds backend.backoff_max_secs".to_string(),
            ));
        }
        if self.limits.logic_max_chars == 0 {
            return Err(AuditError::Config(
                "limits.logic_max_chars must be positive".to_string(),
            ));
        }
        let models = [
            &self.models.syntax,
            &self.models.logic,
            &self.models.performance,
            &self.models.fix,
        ];
        if models.iter().any(|m| m.trim().is_empty()) {
            return Err(AuditError::Config("model identifiers must not be empty".to_string()));
        }
        Ok(())
    }
}
