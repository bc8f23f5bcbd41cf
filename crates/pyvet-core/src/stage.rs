//! Analysis stage definitions.
//!
//! The three review stages differ only in data: template, model, timeout
//! and input shaping. [`AnalysisStage`] carries that data and exposes one
//! uniform `run`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{dispatch, GenerateRequest, InferenceBackend};
use crate::config::AuditConfig;
use crate::error::Result;
use crate::prompt::{PromptTemplate, TemplateKind, CODE_PLACEHOLDER, SKELETON_PLACEHOLDER};

/// Marker opening the text of a report whose stage did not run.
pub const SKIP_MARKER: &str = "[SKIPPED]";

/// Separator placed between joined code units.
pub const UNIT_SEPARATOR: &str = "\n\n";

/// Review stages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Syntax and best-practice review (plus static analysis).
    Syntax,

    /// Logic review over top-level definitions.
    Logic,

    /// Performance review over nested-loop hotspots.
    Performance,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [StageKind::Syntax, StageKind::Logic, StageKind::Performance];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Syntax => "syntax",
            StageKind::Logic => "logic",
            StageKind::Performance => "performance",
        }
    }

    fn template_kind(&self) -> TemplateKind {
        match self {
            StageKind::Syntax => TemplateKind::Syntax,
            StageKind::Logic => TemplateKind::Logic,
            StageKind::Performance => TemplateKind::Performance,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Textual findings from one stage invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingReport {
    pub stage: StageKind,

    /// Line-oriented findings; lines may carry severity tags.
    pub text: String,

    /// Whether the stage was skipped instead of run.
    pub skipped: bool,
}

impl FindingReport {
    pub fn new(stage: StageKind, text: impl Into<String>) -> Self {
        Self {
            stage,
            text: text.into().trim().to_string(),
            skipped: false,
        }
    }

    /// Report for a stage that was not invoked.
    pub fn skipped(stage: StageKind, reason: &str) -> Self {
        Self {
            stage,
            text: format!("{} {} review skipped: {}", SKIP_MARKER, stage, reason),
            skipped: true,
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.lines()
    }
}

/// One configured review stage.
#[derive(Debug, Clone)]
pub struct AnalysisStage {
    kind: StageKind,
    model: String,
    timeout: Duration,
    template: PromptTemplate,
    max_chars: Option<usize>,
    keep_alive: bool,
}

impl AnalysisStage {
    pub fn new(
        kind: StageKind,
        model: impl Into<String>,
        timeout: Duration,
        template: PromptTemplate,
    ) -> Self {
        Self {
            kind,
            model: model.into(),
            timeout,
            template,
            max_chars: None,
            keep_alive: false,
        }
    }

    /// Build a stage from configuration, loading its template.
    pub fn from_config(kind: StageKind, config: &AuditConfig) -> Result<Self> {
        let template =
            PromptTemplate::load(kind.template_kind(), config.paths.prompt_dir.as_deref())?;
        let mut stage = Self::new(
            kind,
            config.models.for_stage(kind),
            config.timeouts.for_stage(kind),
            template,
        );
        if kind == StageKind::Logic {
            stage.max_chars = Some(config.limits.logic_max_chars);
        }
        stage.keep_alive = config.backend.keep_alive;
        Ok(stage)
    }

    /// Cap the joined input at `max_chars` characters.
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = Some(max_chars);
        self
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Join `units` and apply the character budget (plain prefix cut).
    pub fn shape_input(&self, units: &[String]) -> String {
        let joined = units.join(UNIT_SEPARATOR);
        match self.max_chars {
            Some(max) if joined.chars().count() > max => joined.chars().take(max).collect(),
            _ => joined,
        }
    }

    /// Render the prompt for `units`.
    pub fn prompt(&self, units: &[String], skeleton: Option<&str>) -> String {
        let code = self.shape_input(units);
        self.template.render(&[
            (SKELETON_PLACEHOLDER, skeleton.unwrap_or_default()),
            (CODE_PLACEHOLDER, code.as_str()),
        ])
    }

    /// Review `units` and return the trimmed backend response.
    pub async fn run(
        &self,
        backend: &dyn InferenceBackend,
        units: &[String],
    ) -> Result<FindingReport> {
        self.run_with_skeleton(backend, units, None).await
    }

    /// Like [`AnalysisStage::run`], also filling the `{{skeleton}}` placeholder.
    pub async fn run_with_skeleton(
        &self,
        backend: &dyn InferenceBackend,
        units: &[String],
        skeleton: Option<&str>,
    ) -> Result<FindingReport> {
        let request = GenerateRequest::new(&self.model, self.prompt(units, skeleton), self.timeout)
            .with_keep_alive(self.keep_alive);

        debug!(stage = %self.kind, model = %self.model, units = units.len(), "running analysis stage");
        let response = dispatch(backend, &request).await?;
        Ok(FindingReport::new(self.kind, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedBackend;

    fn stage(kind: StageKind, template: &str) -> AnalysisStage {
        AnalysisStage::new(
            kind,
            "test-model",
            Duration::from_secs(5),
            PromptTemplate::new(TemplateKind::Syntax, template),
        )
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(StageKind::Syntax.name(), "syntax");
        assert_eq!(StageKind::Logic.name(), "logic");
        assert_eq!(StageKind::Performance.name(), "performance");
        assert_eq!(StageKind::Logic.to_string(), "logic");
    }

    #[test]
    fn test_skipped_report_is_marked() {
        let report = FindingReport::skipped(StageKind::Logic, "blocking syntax findings");
        assert!(report.skipped);
        assert!(report.text.starts_with(SKIP_MARKER));
        assert!(report.text.contains("logic review skipped"));
    }

    #[test]
    fn test_finding_report_trims() {
        let report = FindingReport::new(StageKind::Syntax, "\n  [HIGH] x \n\n");
        assert_eq!(report.text, "[HIGH] x");
        assert!(!report.skipped);
    }

    #[test]
    fn test_units_joined_with_blank_line() {
        let s = stage(StageKind::Performance, "{{code}}");
        let units = vec!["def a():\n    pass".to_string(), "def b():\n    pass".to_string()];
        assert_eq!(s.shape_input(&units), "def a():\n    pass\n\ndef b():\n    pass");
    }

    #[test]
    fn test_logic_input_truncated_by_prefix() {
        let s = stage(StageKind::Logic, "{{code}}").with_max_chars(10);
        let units = vec!["abcdefgh".to_string(), "ijklmnop".to_string()];
        assert_eq!(s.shape_input(&units), "abcdefgh\n\n");
    }

    #[test]
    fn test_truncation_counts_characters_not_bytes() {
        let s = stage(StageKind::Logic, "{{code}}").with_max_chars(3);
        let units = vec!["héllo".to_string()];
        assert_eq!(s.shape_input(&units), "hél");
    }

    #[test]
    fn test_from_config_applies_logic_budget_only() {
        let config = AuditConfig::default();
        let logic = AnalysisStage::from_config(StageKind::Logic, &config).expect("logic");
        let syntax = AnalysisStage::from_config(StageKind::Syntax, &config).expect("syntax");
        let long = vec!["x".repeat(7000)];
        assert_eq!(logic.shape_input(&long).len(), 6000);
        assert_eq!(syntax.shape_input(&long).len(), 7000);
        assert_eq!(logic.timeout(), Duration::from_secs(480));
        assert_eq!(syntax.model(), "qwen2.5-coder:3b");
    }

    #[test]
    fn test_prompt_fills_skeleton_or_blanks_it() {
        let s = stage(StageKind::Logic, "outline:{{skeleton}}|code:{{code}}");
        let units = vec!["pass".to_string()];
        assert_eq!(s.prompt(&units, Some("def f():")), "outline:def f():|code:pass");
        assert_eq!(s.prompt(&units, None), "outline:|code:pass");
    }

    #[tokio::test]
    async fn test_run_sends_rendered_prompt_and_trims_response() {
        let backend = ScriptedBackend::new().respond("test-model", "  CRITICAL: off by one \n");
        let s = stage(StageKind::Logic, "Review:\n{{code}}");
        let report = s
            .run(&backend, &["def f():\n    return 1".to_string()])
            .await
            .expect("run");

        assert_eq!(report.stage, StageKind::Logic);
        assert_eq!(report.text, "CRITICAL: off by one");

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].prompt, "Review:\ndef f():\n    return 1");
        assert_eq!(calls[0].timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_run_propagates_backend_unavailable() {
        let backend = ScriptedBackend::new().fail("test-model");
        let s = stage(StageKind::Syntax, "{{code}}");
        let err = s.run(&backend, &["x = 1".to_string()]).await.unwrap_err();
        assert!(err.is_backend_unavailable());
    }
}
