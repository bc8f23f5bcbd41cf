//! One validation pass over a source unit.

use std::path::Path;

use tracing::info;

use crate::aggregate::{aggregate, has_blocking_syntax, Verdict};
use crate::backend::InferenceBackend;
use crate::config::AuditConfig;
use crate::error::Result;
use crate::obs;
use crate::source::SourceUnit;
use crate::stage::{AnalysisStage, FindingReport, StageKind};
use crate::static_check::{Diagnostic, StaticAnalyzer, StaticCheckStage};

/// Reason recorded on reports of stages that were short-circuited.
pub const BLOCKING_SKIP_REASON: &str = "blocking syntax findings";

/// Static check, syntax, logic and performance review, then aggregation.
#[derive(Debug, Clone)]
pub struct ValidationPipeline {
    syntax: AnalysisStage,
    logic: AnalysisStage,
    performance: AnalysisStage,
}

impl ValidationPipeline {
    pub fn new(syntax: AnalysisStage, logic: AnalysisStage, performance: AnalysisStage) -> Self {
        Self {
            syntax,
            logic,
            performance,
        }
    }

    pub fn from_config(config: &AuditConfig) -> Result<Self> {
        Ok(Self::new(
            AnalysisStage::from_config(StageKind::Syntax, config)?,
            AnalysisStage::from_config(StageKind::Logic, config)?,
            AnalysisStage::from_config(StageKind::Performance, config)?,
        ))
    }

    /// Run every stage against `unit`, whose text is on disk at `path`.
    ///
    /// Unparseable units get a single blocking syntax line and no model
    /// review. Logic and performance review are skipped when the syntax
    /// report carries a blocking finding.
    pub async fn run(
        &self,
        backend: &dyn InferenceBackend,
        analyzer: &dyn StaticAnalyzer,
        path: &Path,
        unit: &SourceUnit,
    ) -> Result<Verdict> {
        let check = StaticCheckStage::run(analyzer, path).await;

        let syntax = match unit.parse_error() {
            Some(failure) => {
                // Unparseable: one blocking line, no model review.
                let line = check
                    .diagnostics
                    .iter()
                    .find(|d| d.is_blocking())
                    .map(Diagnostic::render_line)
                    .unwrap_or_else(|| failure.finding());
                FindingReport::new(StageKind::Syntax, line)
            }
            None => {
                let llm_syntax = self
                    .syntax
                    .run(backend, &[unit.text().to_string()])
                    .await?;
                let mut parts = vec![check.report.text.clone()];
                if !llm_syntax.text.is_empty() {
                    parts.push(llm_syntax.text);
                }
                FindingReport::new(StageKind::Syntax, parts.join("\n"))
            }
        };
        obs::emit_stage_finished(&syntax);

        let (logic, performance) = if has_blocking_syntax(&syntax) {
            info!(path = %path.display(), "blocking syntax findings; skipping deeper review");
            (
                FindingReport::skipped(StageKind::Logic, BLOCKING_SKIP_REASON),
                FindingReport::skipped(StageKind::Performance, BLOCKING_SKIP_REASON),
            )
        } else {
            let logic = self
                .logic
                .run_with_skeleton(backend, unit.top_level_units(), Some(unit.skeleton()))
                .await?;
            let performance = self.performance.run(backend, unit.hotspots()).await?;
            (logic, performance)
        };
        obs::emit_stage_finished(&logic);
        obs::emit_stage_finished(&performance);

        Ok(aggregate(syntax, logic, performance))
    }
}
