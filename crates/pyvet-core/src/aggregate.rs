//! Verdict scoring over the three stage reports.
//!
//! The score is a pure function of marker presence in the report texts and
//! the outcome is a pure function of the score.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stage::FindingReport;

/// Blocking marker in syntax reports.
pub const SYNTAX_BLOCKING_MARKER: &str = "[HIGH]";

/// Medium marker in syntax reports (fix-worthy, not scored).
pub const SYNTAX_MEDIUM_MARKER: &str = "[MEDIUM]";

pub const LOGIC_CRITICAL_MARKER: &str = "CRITICAL";
pub const LOGIC_MAJOR_MARKER: &str = "MAJOR";

pub const SYNTAX_BLOCKING_PENALTY: i32 = -30;
pub const LOGIC_CRITICAL_PENALTY: i32 = -50;
pub const LOGIC_MAJOR_PENALTY: i32 = -20;

/// Scores at or below this fail.
pub const FAIL_THRESHOLD: i32 = -30;

/// Scores at or below this (and above [`FAIL_THRESHOLD`]) warn.
pub const WARN_THRESHOLD: i32 = -20;

/// Pass/warn/fail classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Pass,
    Warn,
    Fail,
}

impl Outcome {
    pub fn from_score(score: i32) -> Self {
        if score <= FAIL_THRESHOLD {
            Outcome::Fail
        } else if score <= WARN_THRESHOLD {
            Outcome::Warn
        } else {
            Outcome::Pass
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pass => "PASS",
            Outcome::Warn => "WARN",
            Outcome::Fail => "FAIL",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combined result of one validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub syntax: FindingReport,
    pub logic: FindingReport,
    pub performance: FindingReport,
    pub score: i32,
    pub outcome: Outcome,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }

    pub fn reports(&self) -> [&FindingReport; 3] {
        [&self.syntax, &self.logic, &self.performance]
    }
}

/// Whether a syntax report carries a blocking finding.
pub fn has_blocking_syntax(report: &FindingReport) -> bool {
    report.text.contains(SYNTAX_BLOCKING_MARKER)
}

/// Score the three report texts.
pub fn score(syntax: &FindingReport, logic: &FindingReport) -> i32 {
    let mut score = 0;
    if has_blocking_syntax(syntax) {
        score += SYNTAX_BLOCKING_PENALTY;
    }
    if logic.text.contains(LOGIC_CRITICAL_MARKER) {
        score += LOGIC_CRITICAL_PENALTY;
    }
    if logic.text.contains(LOGIC_MAJOR_MARKER) {
        score += LOGIC_MAJOR_PENALTY;
    }
    score
}

/// Combine the three reports into a verdict.
pub fn aggregate(
    syntax: FindingReport,
    logic: FindingReport,
    performance: FindingReport,
) -> Verdict {
    let score = score(&syntax, &logic);
    Verdict {
        outcome: Outcome::from_score(score),
        syntax,
        logic,
        performance,
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageKind;

    fn reports(syntax: &str, logic: &str, perf: &str) -> Verdict {
        aggregate(
            FindingReport::new(StageKind::Syntax, syntax),
            FindingReport::new(StageKind::Logic, logic),
            FindingReport::new(StageKind::Performance, perf),
        )
    }

    #[test]
    fn test_clean_reports_pass() {
        let verdict = reports("No issues found.", "No issues found.", "No issues found.");
        assert_eq!(verdict.score, 0);
        assert_eq!(verdict.outcome, Outcome::Pass);
        assert!(verdict.passed());
    }

    #[test]
    fn test_syntax_blocking_alone_fails() {
        let verdict = reports("[HIGH] SyntaxError: invalid syntax", "", "");
        assert_eq!(verdict.score, -30);
        assert_eq!(verdict.outcome, Outcome::Fail);
    }

    #[test]
    fn test_major_alone_warns() {
        let verdict = reports("", "MAJOR: missing bounds check", "");
        assert_eq!(verdict.score, -20);
        assert_eq!(verdict.outcome, Outcome::Warn);
    }

    #[test]
    fn test_critical_fails() {
        let verdict = reports("", "CRITICAL: division by zero", "");
        assert_eq!(verdict.score, -50);
        assert_eq!(verdict.outcome, Outcome::Fail);
    }

    #[test]
    fn test_penalties_accumulate_once_per_marker() {
        let verdict = reports(
            "[HIGH] a\n[HIGH] b",
            "CRITICAL: x\nCRITICAL: y\nMAJOR: z",
            "O(n^2) loop",
        );
        assert_eq!(verdict.score, -100);
        assert_eq!(verdict.outcome, Outcome::Fail);
    }

    #[test]
    fn test_medium_and_performance_do_not_score() {
        let verdict = reports("[MEDIUM] shadowed builtin", "", "nested loop is O(n^2)");
        assert_eq!(verdict.score, 0);
        assert!(verdict.passed());
    }

    #[test]
    fn test_aggregate_is_pure() {
        let a = reports("[HIGH] x", "MAJOR y", "z");
        let b = reports("[HIGH] x", "MAJOR y", "z");
        assert_eq!(a, b);
    }

    #[test]
    fn test_outcome_serde_uppercase() {
        let json = serde_json::to_string(&Outcome::Warn).expect("serialize");
        assert_eq!(json, "\"WARN\"");
        assert_eq!(Outcome::Fail.to_string(), "FAIL");
    }
}
