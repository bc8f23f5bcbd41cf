//! pyvet - multi-stage review and repair of Python files
//!
//! Runs every target file through the static check and the syntax, logic
//! and performance reviews, optionally feeds the findings to a fix model,
//! and writes one Markdown report plus one JSON trail per file.
//!
//! ## Modes
//!
//! - `audit`: one pass, the source is never modified
//! - `fix`: up to three validate-then-fix passes
//! - `deep`: up to five validate-then-fix passes

mod apply;
mod targets;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use pyvet_backend::OllamaClient;
use pyvet_core::{
    obs, AuditConfig, AuditError, DisabledAnalyzer, InferenceBackend, RepairLoop, RepairMode, RuffAnalyzer,
    SerializedBackend, StaticAnalyzer,
};
use tracing::{error, info, Instrument};

#[derive(Parser)]
#[command(name = "pyvet")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-stage LLM review and repair of Python source files", long_about = None)]
struct Cli {
    /// Python file or directory to process
    target: PathBuf,

    /// audit (report only), fix (3 passes) or deep (5 passes)
    #[arg(short, long, default_value = "audit")]
    mode: RepairMode,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ollama base URL (overrides config and OLLAMA_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Directory with prompt template overrides
    #[arg(long)]
    prompt_dir: Option<PathBuf>,

    /// Directory receiving audit reports
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Repair in memory only; never overwrite source files
    #[arg(long)]
    no_write: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

/// Per-file result line for the run summary.
struct FileSummary {
    path: PathBuf,
    outcome: String,
    score: i32,
    passes: usize,
    stop_reason: String,
    report: PathBuf,
    backup: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    pyvet_core::init_tracing(cli.json, cli.verbose);

    if let Err(e) = check_target(&cli.target) {
        error!(target_path = %cli.target.display(), "target not found");
        eprintln!("error: {}", e);
        return Ok(ExitCode::from(exit_status(&e)));
    }

    let config = load_config(&cli)?;
    let repair = RepairLoop::from_config(&config, cli.mode)
        .context("Failed to prepare review stages")?;
    let client = OllamaClient::from_config(&config.backend)
        .context("Failed to create inference client")?;
    info!(endpoint = %client.endpoint(), mode = %cli.mode, "pyvet {}", pyvet_core::VERSION);
    let backend = SerializedBackend::new(client);

    let analyzer: Box<dyn StaticAnalyzer> = if config.static_check.enabled {
        Box::new(RuffAnalyzer::from_config(
            &config.static_check,
            config.timeouts.static_check(),
        ))
    } else {
        Box::new(DisabledAnalyzer)
    };

    let files = targets::collect_targets(&cli.target);
    if files.is_empty() {
        println!("No Python files found under {}", cli.target.display());
        return Ok(ExitCode::SUCCESS);
    }
    info!(count = files.len(), "collected targets");

    let write = cli.mode.permits_repair() && !cli.no_write;
    let mut failed = 0usize;

    for path in &files {
        let result = process_file(
            &repair,
            &backend,
            analyzer.as_ref(),
            path,
            &config.paths.report_dir,
            write,
        )
        .instrument(obs::file_span(path, cli.mode))
        .await;

        match result {
            Ok(summary) => print_summary(&summary),
            Err(e) => {
                failed += 1;
                error!(file = %path.display(), error = %format!("{:#}", e), "file failed");
                println!("{}: FAILED ({:#})", path.display(), e);
            }
        }
    }

    println!();
    println!("Processed {} file(s), {} failed", files.len(), failed);

    Ok(ExitCode::from(summary_status(failed)))
}

/// Exit status when at least one file could not be processed.
const EXIT_FILE_FAILED: u8 = 1;

/// Exit status when the target does not exist.
const EXIT_PATH_NOT_FOUND: u8 = 2;

fn check_target(target: &Path) -> std::result::Result<(), AuditError> {
    if target.exists() {
        Ok(())
    } else {
        Err(AuditError::PathNotFound(target.to_path_buf()))
    }
}

fn exit_status(err: &AuditError) -> u8 {
    match err {
        AuditError::PathNotFound(_) => EXIT_PATH_NOT_FOUND,
        _ => EXIT_FILE_FAILED,
    }
}

fn summary_status(failed: usize) -> u8 {
    if failed > 0 {
        EXIT_FILE_FAILED
    } else {
        0
    }
}

/// File, then environment, then flags.
fn load_config(cli: &Cli) -> Result<AuditConfig> {
    let base = match &cli.config {
        Some(path) => AuditConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AuditConfig::default(),
    };

    let mut config = base.with_env_overrides();
    if let Some(host) = &cli.host {
        config.backend.host = host.clone();
    }
    if let Some(dir) = &cli.prompt_dir {
        config.paths.prompt_dir = Some(dir.clone());
    }
    if let Some(dir) = &cli.report_dir {
        config.paths.report_dir = dir.clone();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn process_file(
    repair: &RepairLoop,
    backend: &dyn InferenceBackend,
    analyzer: &dyn StaticAnalyzer,
    path: &Path,
    report_dir: &Path,
    write: bool,
) -> Result<FileSummary> {
    let original = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let report = repair.run(backend, analyzer, path, &original).await?;

    let paths = report
        .trail
        .write_report(report_dir)
        .with_context(|| format!("Failed to write report into {}", report_dir.display()))?;
    info!(report = %paths.markdown.display(), trail = %paths.json.display(), "report written");

    let backup = if write && report.changed(&original) {
        let backup = apply::write_with_backup(path, &report.final_code)
            .with_context(|| format!("Failed to write fixed code to {}", path.display()))?;
        info!(backup = %backup.display(), "fixed code written");
        Some(backup)
    } else {
        None
    };

    let (outcome, score) = report
        .trail
        .last_verdict()
        .map(|v| (v.outcome.to_string(), v.score))
        .unwrap_or_else(|| ("UNKNOWN".to_string(), 0));

    Ok(FileSummary {
        path: path.to_path_buf(),
        outcome,
        score,
        passes: report.trail.passes(),
        stop_reason: report.stop_reason.to_string(),
        report: paths.markdown,
        backup,
    })
}

fn print_summary(summary: &FileSummary) {
    println!(
        "{}: {} (score {}) after {} pass(es), stopped: {}",
        summary.path.display(),
        summary.outcome,
        summary.score,
        summary.passes,
        summary.stop_reason
    );
    println!("  report: {}", summary.report.display());
    if let Some(backup) = &summary.backup {
        println!("  fixed in place, backup: {}", backup.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["pyvet", "app.py"]).unwrap();
        assert_eq!(cli.mode, RepairMode::Audit);
        assert!(!cli.no_write);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["pyvet", "app.py", "--mode", "yolo"]).is_err());
    }

    #[test]
    fn test_missing_target_exits_with_two() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.py");

        let err = check_target(&missing).unwrap_err();
        assert!(matches!(err, AuditError::PathNotFound(ref p) if p == &missing));
        assert_eq!(exit_status(&err), 2);
        assert!(check_target(dir.path()).is_ok());
    }

    #[test]
    fn test_summary_status() {
        assert_eq!(summary_status(0), 0);
        assert_eq!(summary_status(3), 1);
        assert_eq!(exit_status(&AuditError::Config("bad".to_string())), 1);
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "pyvet",
            "src",
            "--mode",
            "deep",
            "--host",
            "http://gpu:11434",
            "--report-dir",
            "out",
        ])
        .unwrap();
        assert_eq!(cli.mode, RepairMode::Deep);

        let config = load_config(&cli).unwrap();
        assert_eq!(config.backend.host, "http://gpu:11434");
        assert_eq!(config.paths.report_dir, PathBuf::from("out"));
    }
}
