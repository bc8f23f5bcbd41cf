//! External static analysis.
//!
//! The analyzer (ruff by default) runs as a subprocess with JSON output.
//! Its diagnostics are normalized into finding lines that feed the syntax
//! report. Analyzer faults never abort a pass: they degrade into an
//! `[UNCHECKED]` report and a warning in the log.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::StaticCheckConfig;
use crate::stage::{FindingReport, StageKind};

/// Categories passed to `--select` by default.
pub const DEFAULT_SELECT: [&str; 6] = ["E9", "F63", "F7", "F82", "F401", "F841"];

/// Code prefixes that make a diagnostic blocking.
pub const FATAL_CODE_PREFIXES: [&str; 4] = ["E9", "F63", "F7", "F82"];

pub const BLOCKING_MARKER: &str = "[HIGH]";
pub const ADVISORY_MARKER: &str = "[WARNING]";
pub const CLEAN_REPORT: &str = "[CLEAN] static analysis found no issues";
pub const UNCHECKED_MARKER: &str = "[UNCHECKED]";

/// How much a diagnostic matters to the verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
    Advisory,
    Blocking,
}

impl DiagnosticSeverity {
    /// Classify an analyzer code. Syntax errors come without a code.
    pub fn classify(code: Option<&str>) -> Self {
        match code {
            None => DiagnosticSeverity::Blocking,
            Some(code) if FATAL_CODE_PREFIXES.iter().any(|p| code.starts_with(p)) => {
                DiagnosticSeverity::Blocking
            }
            Some(_) => DiagnosticSeverity::Advisory,
        }
    }

    fn marker(&self) -> &'static str {
        match self {
            DiagnosticSeverity::Blocking => BLOCKING_MARKER,
            DiagnosticSeverity::Advisory => ADVISORY_MARKER,
        }
    }
}

/// A single normalized analyzer diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    /// Line number (1-indexed).
    pub line: u32,

    /// Column number (1-indexed).
    pub column: u32,

    /// Analyzer rule code (e.g. "F401").
    pub code: Option<String>,

    pub message: String,

    pub severity: DiagnosticSeverity,
}

impl Diagnostic {
    /// Create a diagnostic, deriving severity from `code`.
    pub fn new(line: u32, column: u32, code: Option<String>, message: impl Into<String>) -> Self {
        let severity = DiagnosticSeverity::classify(code.as_deref());
        Self {
            line,
            column,
            code,
            message: message.into(),
            severity,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == DiagnosticSeverity::Blocking
    }

    /// `[HIGH] line 3:1 E999 message` style finding line.
    pub fn render_line(&self) -> String {
        match &self.code {
            Some(code) => format!(
                "{} line {}:{} {} {}",
                self.severity.marker(),
                self.line,
                self.column,
                code,
                self.message
            ),
            None => format!(
                "{} line {}:{} {}",
                self.severity.marker(),
                self.line,
                self.column,
                self.message
            ),
        }
    }
}

/// Why the analyzer produced no usable diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum StaticToolError {
    #[error("{program} unavailable: {reason}")]
    Unavailable { program: String, reason: String },

    #[error("analyzer timed out after {0:?}")]
    TimedOut(Duration),

    #[error("analyzer output was not valid JSON: {0}")]
    UnparseableOutput(String),

    #[error("analyzer exited with status {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },

    #[error("static analysis disabled")]
    Disabled,
}

/// Trait for static analyzers run against a file on disk.
#[async_trait]
pub trait StaticAnalyzer: Send + Sync {
    async fn analyze(&self, path: &Path) -> Result<Vec<Diagnostic>, StaticToolError>;
}

/// Analyzer that always reports [`StaticToolError::Disabled`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledAnalyzer;

#[async_trait]
impl StaticAnalyzer for DisabledAnalyzer {
    async fn analyze(&self, _path: &Path) -> Result<Vec<Diagnostic>, StaticToolError> {
        Err(StaticToolError::Disabled)
    }
}

/// Runs `ruff check` with JSON output.
#[derive(Debug, Clone)]
pub struct RuffAnalyzer {
    program: String,
    select: Vec<String>,
    timeout: Duration,
}

impl RuffAnalyzer {
    pub fn new(program: impl Into<String>, select: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            select,
            timeout,
        }
    }

    pub fn from_config(config: &StaticCheckConfig, timeout: Duration) -> Self {
        Self::new(config.program.clone(), config.select.clone(), timeout)
    }

    /// Arguments passed after the program name.
    pub fn args(&self, path: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["check", "--output-format", "json", "--no-cache"]
            .into_iter()
            .map(OsString::from)
            .collect();
        if !self.select.is_empty() {
            args.push("--select".into());
            args.push(self.select.join(",").into());
        }
        args.push(path.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl StaticAnalyzer for RuffAnalyzer {
    async fn analyze(&self, path: &Path) -> Result<Vec<Diagnostic>, StaticToolError> {
        let child = Command::new(&self.program)
            .args(self.args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StaticToolError::Unavailable {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| StaticToolError::TimedOut(self.timeout))?
            .map_err(|e| StaticToolError::Unavailable {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        // 0: clean, 1: violations found. Anything else is a tool failure.
        match output.status.code() {
            Some(0) | Some(1) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                parse_ruff_json(&stdout)
            }
            status => Err(StaticToolError::Failed {
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RuffMessage {
    code: Option<String>,
    message: String,
    location: RuffLocation,
}

#[derive(Debug, Deserialize)]
struct RuffLocation {
    row: u32,
    column: u32,
}

/// Parse ruff's `--output-format json` document, ordered by position.
pub fn parse_ruff_json(stdout: &str) -> Result<Vec<Diagnostic>, StaticToolError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let messages: Vec<RuffMessage> = serde_json::from_str(trimmed)
        .map_err(|e| StaticToolError::UnparseableOutput(e.to_string()))?;

    let mut diagnostics: Vec<Diagnostic> = messages
        .into_iter()
        .map(|m| Diagnostic::new(m.location.row, m.location.column, m.code, m.message))
        .collect();
    diagnostics.sort_by_key(|d| (d.line, d.column));
    Ok(diagnostics)
}

/// Render diagnostics into report text.
pub fn render_report(diagnostics: &[Diagnostic]) -> String {
    if diagnostics.is_empty() {
        return CLEAN_REPORT.to_string();
    }
    diagnostics
        .iter()
        .map(Diagnostic::render_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Output of one static check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticCheck {
    pub diagnostics: Vec<Diagnostic>,

    /// Syntax-stage report carrying the rendered lines.
    pub report: FindingReport,
}

impl StaticCheck {
    pub fn has_blocking(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_blocking)
    }
}

/// Static check stage runner.
pub struct StaticCheckStage;

impl StaticCheckStage {
    /// Run `analyzer` on `path`. Never fails.
    pub async fn run(analyzer: &dyn StaticAnalyzer, path: &Path) -> StaticCheck {
        match analyzer.analyze(path).await {
            Ok(diagnostics) => {
                debug!(
                    path = %path.display(),
                    diagnostics = diagnostics.len(),
                    "static analysis finished"
                );
                let report = FindingReport::new(StageKind::Syntax, render_report(&diagnostics));
                StaticCheck {
                    diagnostics,
                    report,
                }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "static analysis unavailable");
                let text = format!(
                    "{} static analysis produced no diagnostics ({})",
                    UNCHECKED_MARKER, err
                );
                StaticCheck {
                    diagnostics: Vec::new(),
                    report: FindingReport::new(StageKind::Syntax, text),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FixedAnalyzer;
    use std::path::PathBuf;

    const RUFF_OUTPUT: &str = r#"[
      {
        "cell": null,
        "code": "F401",
        "end_location": {"column": 10, "row": 1},
        "filename": "/tmp/a.py",
        "fix": null,
        "location": {"column": 8, "row": 1},
        "message": "`os` imported but unused",
        "noqa_row": 1,
        "url": "https://docs.astral.sh/ruff/rules/unused-import"
      },
      {
        "cell": null,
        "code": null,
        "end_location": {"column": 8, "row": 4},
        "filename": "/tmp/a.py",
        "fix": null,
        "location": {"column": 7, "row": 4},
        "message": "SyntaxError: Expected an expression",
        "noqa_row": null,
        "url": null
      },
      {
        "code": "F821",
        "location": {"column": 5, "row": 3},
        "message": "Undefined name `y`"
      }
    ]"#;

    #[test]
    fn test_classification_by_prefix() {
        assert_eq!(DiagnosticSeverity::classify(Some("E999")), DiagnosticSeverity::Blocking);
        assert_eq!(DiagnosticSeverity::classify(Some("F632")), DiagnosticSeverity::Blocking);
        assert_eq!(DiagnosticSeverity::classify(Some("F706")), DiagnosticSeverity::Blocking);
        assert_eq!(DiagnosticSeverity::classify(Some("F821")), DiagnosticSeverity::Blocking);
        assert_eq!(DiagnosticSeverity::classify(Some("F401")), DiagnosticSeverity::Advisory);
        assert_eq!(DiagnosticSeverity::classify(Some("F841")), DiagnosticSeverity::Advisory);
        assert_eq!(DiagnosticSeverity::classify(None), DiagnosticSeverity::Blocking);
    }

    #[test]
    fn test_parse_ruff_json_sorts_by_position() {
        let diagnostics = parse_ruff_json(RUFF_OUTPUT).expect("parse");
        assert_eq!(diagnostics.len(), 3);
        assert_eq!(diagnostics[0].code.as_deref(), Some("F401"));
        assert_eq!(diagnostics[1].line, 3);
        assert_eq!(diagnostics[2].code, None);
        assert!(!diagnostics[0].is_blocking());
        assert!(diagnostics[1].is_blocking());
        assert!(diagnostics[2].is_blocking());
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_ruff_json("[]").expect("parse").is_empty());
        assert!(parse_ruff_json("  \n").expect("parse").is_empty());
    }

    #[test]
    fn test_parse_garbage_output() {
        let err = parse_ruff_json("error: unexpected argument").unwrap_err();
        assert!(matches!(err, StaticToolError::UnparseableOutput(_)));
    }

    #[test]
    fn test_render_lines() {
        let diagnostics = parse_ruff_json(RUFF_OUTPUT).expect("parse");
        let report = render_report(&diagnostics);
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "[WARNING] line 1:8 F401 `os` imported but unused");
        assert_eq!(lines[1], "[HIGH] line 3:5 F821 Undefined name `y`");
        assert_eq!(lines[2], "[HIGH] line 4:7 SyntaxError: Expected an expression");
        assert_eq!(render_report(&[]), CLEAN_REPORT);
    }

    #[test]
    fn test_args_include_select_and_path() {
        let analyzer = RuffAnalyzer::from_config(&StaticCheckConfig::default(), Duration::from_secs(30));
        let args = analyzer.args(Path::new("/tmp/a.py"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "check",
                "--output-format",
                "json",
                "--no-cache",
                "--select",
                "E9,F63,F7,F82,F401,F841",
                "/tmp/a.py"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let analyzer = RuffAnalyzer::new("pyvet-no-such-analyzer", vec![], Duration::from_secs(5));
        let err = analyzer.analyze(Path::new("x.py")).await.unwrap_err();
        assert!(matches!(err, StaticToolError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_non_json_stdout_is_unparseable() {
        // `echo` prints its arguments and exits 0.
        let analyzer = RuffAnalyzer::new("echo", vec![], Duration::from_secs(5));
        let err = analyzer.analyze(Path::new("x.py")).await.unwrap_err();
        assert!(matches!(err, StaticToolError::UnparseableOutput(_)));
    }

    #[tokio::test]
    async fn test_unexpected_exit_status_is_failure() {
        // `sh check ...` cannot open a script named `check`.
        let analyzer = RuffAnalyzer::new("sh", vec![], Duration::from_secs(5));
        let err = analyzer.analyze(Path::new("x.py")).await.unwrap_err();
        match err {
            StaticToolError::Failed { status, .. } => assert_ne!(status, Some(0)),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stage_degrades_to_unchecked() {
        let check = StaticCheckStage::run(&DisabledAnalyzer, Path::new("x.py")).await;
        assert!(check.diagnostics.is_empty());
        assert!(!check.has_blocking());
        assert!(check.report.text.starts_with(UNCHECKED_MARKER));
        assert!(check.report.text.contains("disabled"));
    }

    #[tokio::test]
    async fn test_stage_reports_blocking() {
        let analyzer = FixedAnalyzer::new(vec![Diagnostic::new(
            1,
            7,
            None,
            "SyntaxError: Expected an identifier",
        )]);
        let check = StaticCheckStage::run(&analyzer, &PathBuf::from("x.py")).await;
        assert!(check.has_blocking());
        assert_eq!(check.report.stage, StageKind::Syntax);
        assert!(check.report.text.starts_with(BLOCKING_MARKER));
    }

    #[tokio::test]
    async fn test_stage_clean() {
        let check = StaticCheckStage::run(&FixedAnalyzer::clean(), Path::new("x.py")).await;
        assert_eq!(check.report.text, CLEAN_REPORT);
    }
}
