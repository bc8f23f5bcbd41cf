//! Structured observability hooks for audit lifecycle events.
//!
//! This module provides:
//! - A file-scoped tracing span via [`file_span`]
//! - Emission functions for pass, stage, verdict, fix and stop events
//!
//! Events are emitted at `info!` level with an `event` field so JSON log
//! consumers can filter on it.

use std::path::Path;

use tracing::{info, Span};

use crate::aggregate::Verdict;
use crate::repair::{RepairMode, StopReason};
use crate::stage::FindingReport;

/// Span tagging every event of one processed file.
///
/// Attach it with [`tracing::Instrument`] so it follows the future across
/// await points:
///
/// ```ignore
/// repair.run(&backend, &analyzer, path, &code)
///     .instrument(obs::file_span(path, mode))
///     .await?;
/// ```
pub fn file_span(target: &Path, mode: RepairMode) -> Span {
    tracing::info_span!("pyvet.file", target = %target.display(), mode = %mode)
}

/// Emit event: a validation pass started.
pub fn emit_pass_started(index: u32, chars: usize) {
    info!(event = "pass.started", pass = index, chars = chars);
}

/// Emit event: one stage report is available.
pub fn emit_stage_finished(report: &FindingReport) {
    info!(
        event = "stage.finished",
        stage = %report.stage,
        skipped = report.skipped,
        lines = report.text.lines().count(),
    );
}

/// Emit event: a pass produced its verdict.
pub fn emit_verdict(index: u32, verdict: &Verdict) {
    info!(
        event = "pass.verdict",
        pass = index,
        score = verdict.score,
        outcome = %verdict.outcome,
    );
}

/// Emit event: the fix stage replaced the current code.
pub fn emit_fix_applied(index: u32, issues: usize, before_chars: usize, after_chars: usize) {
    info!(
        event = "fix.applied",
        pass = index,
        issues = issues,
        before_chars = before_chars,
        after_chars = after_chars,
    );
}

/// Emit event: the repair loop stopped.
pub fn emit_loop_stopped(passes: usize, reason: StopReason) {
    info!(event = "loop.stopped", passes = passes, reason = %reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageKind;

    #[test]
    fn test_file_span_create() {
        let span = file_span(Path::new("app.py"), RepairMode::Fix);
        let _entered = span.enter();
        emit_stage_finished(&FindingReport::new(StageKind::Syntax, "[CLEAN]"));
        emit_loop_stopped(1, StopReason::Passed);
    }
}
