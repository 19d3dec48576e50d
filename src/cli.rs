//! Command-line interface for codeaudit.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use crate::analyzers::Severity;
use crate::config::{AnalysisDepth, RunConfig, Settings};
use crate::report;
use crate::runner::Runner;

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Config file names looked up in the scanned directory.
const DEFAULT_CONFIG_NAMES: &[&str] = &["codeaudit.yaml", ".codeaudit.yaml"];

/// Static analysis for Python source trees.
///
/// Codeaudit finds duplicated code, design conflicts (shared global state,
/// thread races, leaked resources, unhandled exceptions), complexity and
/// style problems, documentation gaps and stale or duplicated files.
#[derive(Parser)]
#[command(name = "codeaudit")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze a project directory
    #[command(visible_alias = "check")]
    Scan(ScanArgs),
}

/// Arguments for the scan command.
#[derive(Parser)]
pub struct ScanArgs {
    /// Project directory to analyze
    pub path: PathBuf,

    /// Path to a YAML settings file (default: codeaudit.yaml in the project)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Minimum severity to report: low, medium or high
    #[arg(short, long)]
    pub threshold: Option<Severity>,

    /// Analysis depth: quick, standard or full
    #[arg(short, long)]
    pub depth: Option<AnalysisDepth>,

    /// Disable the parse cache
    #[arg(long)]
    pub no_cache: bool,

    /// Only analyze files changed since the last incremental run
    #[arg(long)]
    pub incremental: bool,

    /// Run analyzers one after another instead of in parallel
    #[arg(long)]
    pub sequential: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// List suppressed findings in the console summary
    #[arg(long)]
    pub show_suppressed: bool,
}

/// Find a settings file inside the project directory.
fn discover_config(project: &Path) -> Option<PathBuf> {
    DEFAULT_CONFIG_NAMES
        .iter()
        .map(|name| project.join(name))
        .find(|path| path.is_file())
}

/// Apply command-line overrides on top of file settings.
fn apply_overrides(mut settings: Settings, args: &ScanArgs) -> Settings {
    if let Some(threshold) = args.threshold {
        settings.severity_threshold = threshold;
    }
    if let Some(depth) = args.depth {
        settings.analysis_depth = depth;
    }
    if args.no_cache {
        settings.enable_caching = false;
    }
    if args.incremental {
        settings.incremental_enabled = true;
    }
    if args.sequential {
        settings.parallel = false;
    }
    settings
}

/// Build the run configuration from the arguments.
pub fn build_config(args: &ScanArgs) -> anyhow::Result<RunConfig> {
    let config_path = args.config.clone().or_else(|| discover_config(&args.path));
    let settings = match &config_path {
        Some(path) => Settings::parse_file(path)?,
        None => Settings::default(),
    };
    let settings = apply_overrides(settings, args);
    RunConfig::new(&args.path, settings)
        .with_context(|| format!("invalid configuration for {}", args.path.display()))
}

fn spinner(enabled: bool) -> Option<ProgressBar> {
    if !enabled || !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", " "]));
    }
    pb.enable_steady_tick(Duration::from_millis(80));
    Some(pb)
}

/// Run the scan command.
pub fn run_scan(args: &ScanArgs) -> anyhow::Result<i32> {
    let config = match build_config(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return Ok(EXIT_ERROR);
        }
    };

    let progress = spinner(!args.json);
    if let Some(pb) = &progress {
        pb.set_message(format!("Analyzing {}", config.project_path().display()));
    }
    let result = Runner::new(config).run();
    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }
    let report = result?;

    if args.json {
        report::write_json(&report)?;
    } else {
        report::write_pretty(&report, args.show_suppressed);
    }

    if report.has_high() {
        Ok(EXIT_FAILED)
    } else {
        Ok(EXIT_SUCCESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(path: &Path, extra: &[&str]) -> ScanArgs {
        let mut argv = vec!["codeaudit", "scan", path.to_str().unwrap()];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Scan(args) => args,
        }
    }

    #[test]
    fn test_overrides_apply() {
        let temp = TempDir::new().unwrap();
        let args = args(
            temp.path(),
            &["--threshold", "high", "--depth", "quick", "--no-cache", "--incremental", "--sequential"],
        );
        let config = build_config(&args).unwrap();
        let settings = config.settings();
        assert_eq!(settings.severity_threshold, Severity::High);
        assert_eq!(settings.analysis_depth, AnalysisDepth::Quick);
        assert!(!settings.enable_caching);
        assert!(settings.incremental_enabled);
        assert!(!settings.parallel);
    }

    #[test]
    fn test_bad_threshold_rejected() {
        let temp = TempDir::new().unwrap();
        let argv = ["codeaudit", "scan", temp.path().to_str().unwrap(), "--threshold", "urgent"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_discovers_project_config() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("codeaudit.yaml"),
            "severity_threshold: medium\nquality:\n  complexity_threshold: 4\n",
        )
        .unwrap();
        let config = build_config(&args(temp.path(), &[])).unwrap();
        assert_eq!(config.severity_threshold(), Severity::Medium);
        assert_eq!(config.settings().quality.complexity_threshold, 4);
    }

    #[test]
    fn test_missing_path_is_config_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");
        let code = run_scan(&args(&missing, &["--json"])).unwrap();
        assert_eq!(code, EXIT_ERROR);
    }

    #[test]
    fn test_high_findings_fail() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("leak.py"),
            "def head(path):\n    fh = open(path)\n    return fh.readline()\n",
        )
        .unwrap();
        let code = run_scan(&args(temp.path(), &["--json", "--no-cache"])).unwrap();
        assert_eq!(code, EXIT_FAILED);
    }
}
