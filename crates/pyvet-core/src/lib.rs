//! pyvet core library
//!
//! Multi-stage review and bounded repair of Python source files against a
//! local inference service. Re-exports the pipeline components for
//! programmatic use; the `pyvet` binary is a thin shell over [`RepairLoop`].

pub mod aggregate;
pub mod audit;
pub mod backend;
pub mod config;
pub mod error;
pub mod fakes;
pub mod fix;
pub mod issues;
pub mod obs;
pub mod pipeline;
pub mod prompt;
pub mod repair;
pub mod source;
pub mod stage;
pub mod static_check;
pub mod telemetry;

pub use aggregate::{aggregate, Outcome, Verdict};
pub use audit::{apply_unified_diff, unified_diff, AuditTrail, IterationRecord, ReportPaths};
pub use backend::{dispatch, GenerateRequest, InferenceBackend, SerializedBackend};
pub use config::AuditConfig;
pub use error::{AuditError, BackendError, Result};
pub use fix::{parse_fix_response, FixOutcome, FixParse, FixStage};
pub use issues::{extract_issues, IssueList};
pub use pipeline::ValidationPipeline;
pub use prompt::{PromptTemplate, TemplateKind};
pub use repair::{RepairLoop, RepairMode, RepairReport, StopReason};
pub use source::{ParseFailure, SourceUnit};
pub use stage::{AnalysisStage, FindingReport, StageKind};
pub use static_check::{
    Diagnostic, DiagnosticSeverity, DisabledAnalyzer, RuffAnalyzer, StaticAnalyzer,
    StaticCheckStage, StaticToolError,
};
pub use telemetry::init_tracing;

/// Crate version, as reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
