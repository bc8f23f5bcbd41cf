//! Fix-worthy issue extraction from a verdict.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::aggregate::{
    Verdict, LOGIC_CRITICAL_MARKER, LOGIC_MAJOR_MARKER, SYNTAX_BLOCKING_MARKER,
    SYNTAX_MEDIUM_MARKER,
};
use crate::stage::FindingReport;

/// Lowercase keywords that make a performance line fix-worthy.
pub const PERFORMANCE_KEYWORDS: [&str; 5] = ["o(", "loop", "inefficient", "vector", "bottleneck"];

/// Ordered, deduplicated issue lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueList {
    lines: Vec<String>,
}

impl IssueList {
    /// Build from raw lines, trimming, dropping empties and duplicates.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for line in lines {
            let line = line.as_ref().trim();
            if !line.is_empty() && seen.insert(line.to_string()) {
                out.push(line.to_string());
            }
        }
        Self { lines: out }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Issue text handed to the fix prompt.
    pub fn as_text(&self) -> String {
        self.lines.join("\n")
    }
}

fn matching_lines<'a>(
    report: &'a FindingReport,
    keep: fn(&str) -> bool,
) -> impl Iterator<Item = &'a str> + 'a {
    let skipped = report.skipped;
    report.lines().filter(move |line| !skipped && keep(*line))
}

fn is_syntax_issue(line: &str) -> bool {
    line.contains(SYNTAX_BLOCKING_MARKER) || line.contains(SYNTAX_MEDIUM_MARKER)
}

fn is_logic_issue(line: &str) -> bool {
    line.contains(LOGIC_CRITICAL_MARKER) || line.contains(LOGIC_MAJOR_MARKER)
}

fn is_performance_issue(line: &str) -> bool {
    let lower = line.to_lowercase();
    PERFORMANCE_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Extract the fix-worthy lines of `verdict`. A passing verdict yields none.
pub fn extract_issues(verdict: &Verdict) -> IssueList {
    if verdict.passed() {
        return IssueList::default();
    }

    let syntax = matching_lines(&verdict.syntax, is_syntax_issue);
    let logic = matching_lines(&verdict.logic, is_logic_issue);
    let performance = matching_lines(&verdict.performance, is_performance_issue);

    IssueList::from_lines(syntax.chain(logic).chain(performance))
}
