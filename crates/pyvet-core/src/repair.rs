//! Bounded validate-then-fix loop.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audit::{AuditTrail, IterationRecord};
use crate::backend::InferenceBackend;
use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::fix::FixStage;
use crate::issues::extract_issues;
use crate::obs;
use crate::pipeline::ValidationPipeline;
use crate::source::SourceUnit;
use crate::static_check::StaticAnalyzer;

/// How far the loop is allowed to go.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RepairMode {
    /// One pass, never fix.
    #[default]
    Audit,

    /// Up to three passes.
    Fix,

    /// Up to five passes.
    Deep,
}

impl RepairMode {
    pub fn max_passes(&self) -> u32 {
        match self {
            RepairMode::Audit => 1,
            RepairMode::Fix => 3,
            RepairMode::Deep => 5,
        }
    }

    pub fn permits_repair(&self) -> bool {
        !matches!(self, RepairMode::Audit)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RepairMode::Audit => "audit",
            RepairMode::Fix => "fix",
            RepairMode::Deep => "deep",
        }
    }
}

impl fmt::Display for RepairMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepairMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audit" => Ok(RepairMode::Audit),
            "fix" => Ok(RepairMode::Fix),
            "deep" => Ok(RepairMode::Deep),
            other => Err(format!("unknown mode '{}' (expected audit, fix or deep)", other)),
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The last verdict passed.
    Passed,

    /// Audit mode: one pass, no fixes.
    AuditOnly,

    /// The verdict did not pass but no fix-worthy lines were found.
    NothingToFix,

    /// The fix returned the code unchanged.
    Stagnated,

    /// The pass bound for the mode was reached.
    BoundExhausted,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Passed => "passed",
            StopReason::AuditOnly => "audit_only",
            StopReason::NothingToFix => "nothing_to_fix",
            StopReason::Stagnated => "stagnated",
            StopReason::BoundExhausted => "bound_exhausted",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a full loop over one file.
#[derive(Debug, Clone)]
pub struct RepairReport {
    pub final_code: String,
    pub stop_reason: StopReason,
    pub trail: AuditTrail,
}

impl RepairReport {
    pub fn changed(&self, original: &str) -> bool {
        self.final_code != original
    }
}

/// Validation pipeline plus an optional fix stage, bounded by mode.
#[derive(Debug, Clone)]
pub struct RepairLoop {
    pipeline: ValidationPipeline,
    fixer: Option<FixStage>,
    mode: RepairMode,
}

/// Candidate code written to a scratch file so the analyzer can read it.
struct Scratch {
    file: tempfile::NamedTempFile,
}

impl Scratch {
    fn write(code: &str) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("pyvet-")
            .suffix(".py")
            .tempfile()?;
        file.write_all(code.as_bytes())?;
        file.flush()?;
        Ok(Self { file })
    }

    fn path(&self) -> &Path {
        self.file.path()
    }
}

impl RepairLoop {
    /// `fixer` is ignored in audit mode.
    pub fn new(pipeline: ValidationPipeline, fixer: Option<FixStage>, mode: RepairMode) -> Self {
        let fixer = if mode.permits_repair() { fixer } else { None };
        Self {
            pipeline,
            fixer,
            mode,
        }
    }

    pub fn from_config(config: &AuditConfig, mode: RepairMode) -> Result<Self> {
        let pipeline = ValidationPipeline::from_config(config)?;
        let fixer = if mode.permits_repair() {
            Some(FixStage::from_config(config)?)
        } else {
            None
        };
        Ok(Self::new(pipeline, fixer, mode))
    }

    pub fn mode(&self) -> RepairMode {
        self.mode
    }

    /// Validate `original` (read from `target`) and repair it within the mode's bound.
    ///
    /// `target` is only read. Candidate revisions are checked from scratch
    /// files; the caller decides whether to write [`RepairReport::final_code`].
    pub async fn run(
        &self,
        backend: &dyn InferenceBackend,
        analyzer: &dyn StaticAnalyzer,
        target: &Path,
        original: &str,
    ) -> Result<RepairReport> {
        let target_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AuditError::PathNotFound(target.to_path_buf()))?;

        let mut trail = AuditTrail::new(target_name, self.mode);
        let mut current = original.to_string();
        let max_passes = self.mode.max_passes();
        let mut index = 0u32;

        let stop_reason = loop {
            index += 1;
            obs::emit_pass_started(index, current.chars().count());

            let scratch = if current == original {
                None
            } else {
                Some(Scratch::write(&current)?)
            };
            let check_path = scratch.as_ref().map_or(target, Scratch::path);

            let unit = SourceUnit::parse(current.as_str());
            let verdict = self.pipeline.run(backend, analyzer, check_path, &unit).await?;
            drop(scratch);
            obs::emit_verdict(index, &verdict);

            let issues = extract_issues(&verdict);
            let mut record = IterationRecord {
                index,
                verdict,
                issues,
                code_before: current.clone(),
                code_after: current.clone(),
                fixed_by: None,
            };

            if record.verdict.passed() {
                trail.record(record);
                break StopReason::Passed;
            }
            let Some(fixer) = &self.fixer else {
                trail.record(record);
                break StopReason::AuditOnly;
            };
            if record.issues.is_empty() {
                trail.record(record);
                break StopReason::NothingToFix;
            }

            let outcome = fixer.fix(backend, &current, &record.issues).await?;
            if outcome.code.trim() == current.trim() {
                debug!(pass = index, "fix produced no change");
                trail.record(record);
                break StopReason::Stagnated;
            }

            obs::emit_fix_applied(
                index,
                record.issues.len(),
                current.chars().count(),
                outcome.code.chars().count(),
            );
            record.code_after = outcome.code.clone();
            record.fixed_by = outcome.recovered_by;
            trail.record(record);
            current = outcome.code;

            if index >= max_passes {
                break StopReason::BoundExhausted;
            }
        };

        trail.finalize(original, &current, stop_reason);
        obs::emit_loop_stopped(trail.passes(), stop_reason);

        Ok(RepairReport {
            final_code: current,
            stop_reason,
            trail,
        })
    }
}
