//! Audit trail: per-pass records, the final diff, and report artifacts.
//!
//! Each processed file produces two artifacts in the report directory:
//! - `AUDIT_<stem>_<timestamp>_<run>.md`, a human-readable report
//! - `AUDIT_<stem>_<timestamp>_<run>.json`, the serialized trail with
//!   SHA-256 digests of the original and final code

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use similar::TextDiff;
use uuid::Uuid;

use crate::aggregate::Verdict;
use crate::error::Result;
use crate::fix::FixParse;
use crate::issues::IssueList;
use crate::repair::{RepairMode, StopReason};

/// Diff header naming the input side.
pub const DIFF_ORIGINAL_HEADER: &str = "original";

/// Diff header naming the output side.
pub const DIFF_FIXED_HEADER: &str = "fixed";

const NO_CHANGES: &str = "**No code changes were applied.**";
const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// One validation pass, and the fix that followed it if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based pass number.
    pub index: u32,
    pub verdict: Verdict,
    pub issues: IssueList,
    pub code_before: String,

    /// Equal to `code_before` when no fix was applied.
    pub code_after: String,

    pub fixed_by: Option<FixParse>,
}

impl IterationRecord {
    pub fn changed(&self) -> bool {
        self.code_before != self.code_after
    }
}

/// Paths of the persisted report artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub markdown: PathBuf,
    pub json: PathBuf,
}

/// Everything that happened to one file during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    pub run_id: Uuid,
    pub target_name: String,
    pub mode: RepairMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub iterations: Vec<IterationRecord>,
    pub final_diff: String,
    pub stop_reason: Option<StopReason>,
    pub original_digest: Option<String>,
    pub final_digest: Option<String>,
}

/// SHA-256 of `text`, hex encoded.
pub fn content_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

impl AuditTrail {
    pub fn new(target_name: impl Into<String>, mode: RepairMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            target_name: target_name.into(),
            mode,
            started_at: Utc::now(),
            finished_at: None,
            iterations: Vec::new(),
            final_diff: String::new(),
            stop_reason: None,
            original_digest: None,
            final_digest: None,
        }
    }

    pub fn record(&mut self, record: IterationRecord) {
        self.iterations.push(record);
    }

    pub fn passes(&self) -> usize {
        self.iterations.len()
    }

    pub fn last_verdict(&self) -> Option<&Verdict> {
        self.iterations.last().map(|r| &r.verdict)
    }

    /// Close the trail and compute the diff from `original` to `final_code`.
    pub fn finalize(&mut self, original: &str, final_code: &str, stop_reason: StopReason) -> &str {
        self.final_diff = unified_diff(original, final_code);
        self.stop_reason = Some(stop_reason);
        self.original_digest = Some(content_digest(original));
        self.final_digest = Some(content_digest(final_code));
        self.finished_at = Some(Utc::now());
        &self.final_diff
    }

    /// Base name shared by the Markdown and JSON artifacts.
    pub fn report_stem(&self) -> String {
        let stem = Path::new(&self.target_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let run = self.run_id.simple().to_string();
        format!(
            "AUDIT_{}_{}_{}",
            stem,
            self.started_at.format("%Y%m%d_%H%M%S"),
            &run[..8]
        )
    }

    /// Render the human-readable report.
    pub fn render_markdown(&self) -> String {
        let mut md = format!("# AI CODE AUDIT REPORT: {}\n\n", self.target_name);
        md.push_str(&format!("**Date:** {}\n", self.started_at.to_rfc3339()));
        md.push_str(&format!("**Run:** {}\n", self.run_id));
        md.push_str(&format!("**Mode:** {}\n", self.mode));

        for record in &self.iterations {
            md.push_str(&format!(
                "\n## Pass {}: {} (score {})\n",
                record.index, record.verdict.outcome, record.verdict.score
            ));
            for report in record.verdict.reports() {
                md.push_str(&format!("\n### {}\n\n```text\n{}\n```\n", report.stage, report.text));
            }
            if !record.issues.is_empty() {
                md.push_str("\n### Issues\n\n");
                for line in record.issues.lines() {
                    md.push_str(&format!("- {}\n", line));
                }
            }
            if record.changed() {
                md.push_str("\nFix applied.\n");
            }
        }

        md.push_str("\n## Result\n\n");
        match self.stop_reason {
            Some(reason) => md.push_str(&format!("**Stop reason:** {}\n", reason)),
            None => md.push_str("**Stop reason:** unfinished\n"),
        }
        md.push_str(&format!("**Passes:** {}\n", self.passes()));

        md.push_str("\n## Change Log (Diff)\n\n");
        if self.final_diff.is_empty() {
            md.push_str(NO_CHANGES);
            md.push('\n');
        } else {
            md.push_str("```diff\n");
            md.push_str(&self.final_diff);
            if !self.final_diff.ends_with('\n') {
                md.push('\n');
            }
            md.push_str("```\n");
        }

        md
    }

    /// Persist the Markdown report and the JSON trail into `dir`.
    pub fn write_report(&self, dir: &Path) -> Result<ReportPaths> {
        std::fs::create_dir_all(dir)?;
        let stem = self.report_stem();
        let markdown = dir.join(format!("{}.md", stem));
        let json = dir.join(format!("{}.json", stem));

        std::fs::write(&markdown, self.render_markdown())?;
        std::fs::write(&json, serde_json::to_vec_pretty(self)?)?;

        Ok(ReportPaths { markdown, json })
    }
}

/// Line-based unified diff with three lines of context; empty when equal.
pub fn unified_diff(original: &str, revised: &str) -> String {
    if original == revised {
        return String::new();
    }
    TextDiff::from_lines(original, revised)
        .unified_diff()
        .context_radius(3)
        .header(DIFF_ORIGINAL_HEADER, DIFF_FIXED_HEADER)
        .to_string()
}

/// Failure to apply a unified diff.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("malformed hunk header: {0}")]
    MalformedHunk(String),

    #[error("context mismatch at original line {line}")]
    ContextMismatch { line: usize },
}

#[derive(Debug)]
struct Hunk {
    old_start: usize,
    old_len: usize,
    lines: Vec<(char, String)>,
}

/// `-a[,b]` or `+c[,d]`; a missing length means 1.
fn parse_range(range: &str) -> Option<(usize, usize)> {
    let range = range.get(1..)?;
    match range.split_once(',') {
        Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

fn parse_hunk_header(line: &str) -> std::result::Result<(usize, usize), PatchError> {
    let malformed = || PatchError::MalformedHunk(line.trim_end().to_string());
    let inner = line
        .trim_end()
        .strip_prefix("@@ ")
        .and_then(|rest| rest.split(" @@").next())
        .ok_or_else(malformed)?;
    let old = inner.split_whitespace().next().ok_or_else(malformed)?;
    if !old.starts_with('-') {
        return Err(malformed());
    }
    parse_range(old).ok_or_else(malformed)
}

/// Split after every `\r\n`, `\n` or lone `\r`, keeping the terminators.
///
/// Matches the line tokenization of `similar::TextDiff::from_lines`.
fn split_lines_inclusive(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        let end = match bytes[idx] {
            b'\r' if bytes.get(idx + 1) == Some(&b'\n') => Some(idx + 2),
            b'\r' | b'\n' => Some(idx + 1),
            _ => None,
        };
        match end {
            Some(end) => {
                lines.push(&text[start..end]);
                start = end;
                idx = end;
            }
            None => idx += 1,
        }
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

fn parse_hunks(diff: &str) -> std::result::Result<Vec<Hunk>, PatchError> {
    let mut hunks: Vec<Hunk> = Vec::new();

    for line in split_lines_inclusive(diff) {
        if line.starts_with("@@") {
            let (old_start, old_len) = parse_hunk_header(line)?;
            hunks.push(Hunk {
                old_start,
                old_len,
                lines: Vec::new(),
            });
            continue;
        }
        // File headers precede the first hunk.
        let Some(hunk) = hunks.last_mut() else {
            continue;
        };
        if line.trim_end_matches(['\r', '\n']) == NO_NEWLINE_MARKER {
            if let Some((_, previous)) = hunk.lines.last_mut() {
                if previous.ends_with('\n') {
                    previous.pop();
                }
            }
            continue;
        }
        let mut chars = line.chars();
        match chars.next() {
            Some(tag @ (' ' | '-' | '+')) => hunk.lines.push((tag, chars.as_str().to_string())),
            _ => return Err(PatchError::MalformedHunk(line.trim_end().to_string())),
        }
    }

    Ok(hunks)
}

/// Apply a unified diff produced by [`unified_diff`] to `original`.
pub fn apply_unified_diff(original: &str, diff: &str) -> std::result::Result<String, PatchError> {
    let source = split_lines_inclusive(original);
    let mut out = String::with_capacity(original.len() + diff.len());
    let mut cursor = 0usize;

    for hunk in parse_hunks(diff)? {
        let start = if hunk.old_len == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        if start < cursor || start > source.len() {
            return Err(PatchError::ContextMismatch { line: start + 1 });
        }
        for line in &source[cursor..start] {
            out.push_str(line);
        }
        cursor = start;

        for (tag, text) in &hunk.lines {
            match tag {
                '+' => out.push_str(text),
                _ => {
                    if source.get(cursor) != Some(&text.as_str()) {
                        return Err(PatchError::ContextMismatch { line: cursor + 1 });
                    }
                    if *tag == ' ' {
                        out.push_str(text);
                    }
                    cursor += 1;
                }
            }
        }
    }

    for line in &source[cursor..] {
        out.push_str(line);
    }
    Ok(out)
}
