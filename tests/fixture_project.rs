//! Integration tests for the full pipeline against the testdata fixture.
//!
//! The fixture mixes most kinds of problems the analyzers know about:
//! a function copied across packages, a global mutated from two functions
//! (one of them a thread target), an unclosed file, a file that does not
//! parse, a stale backup and documentation pointing at a missing symbol.

use std::path::{Path, PathBuf};

use codeaudit::{Category, Report, RunConfig, Runner, Settings, Severity};

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join("sample_project")
}

/// Run every analyzer over the fixture without writing a cache into it.
fn run_fixture(settings: Settings) -> Report {
    let settings = Settings {
        enable_caching: false,
        incremental_enabled: false,
        ..settings
    };
    let config = RunConfig::new(fixture_path(), settings).expect("fixture config is valid");
    Runner::new(config).run().expect("run completes")
}

fn paths(report: &Report, category: Category) -> Vec<PathBuf> {
    report
        .by_category
        .get(&category)
        .map(|fs| fs.iter().map(|f| f.file_path.clone()).collect())
        .unwrap_or_default()
}

#[test]
fn test_fixture_scans_every_python_file() {
    let report = run_fixture(Settings::default());
    assert_eq!(report.files_scanned, 5);
    assert_eq!(report.analyzer_summaries.len(), 5);
}

#[test]
fn test_copied_function_is_exact_duplicate() {
    let report = run_fixture(Settings::default());
    let exact = &report.by_category[&Category::ExactDuplicate];
    assert_eq!(exact.len(), 1);
    assert!(exact[0].description.contains("inventory/stock.py"));
    assert!(exact[0].description.contains("shipping/rules.py"));
}

#[test]
fn test_design_conflicts_detected() {
    let report = run_fixture(Settings::default());
    let stock = Path::new("inventory/stock.py");

    assert!(paths(&report, Category::GlobalVariableConflict).contains(&stock.to_path_buf()));
    assert!(paths(&report, Category::ThreadingIssue).contains(&stock.to_path_buf()));
    assert!(paths(&report, Category::ResourceLeak).contains(&stock.to_path_buf()));
    // int() inside a matching handler is covered
    assert!(!paths(&report, Category::UnhandledException).contains(&PathBuf::from("shipping/rules.py")));
}

#[test]
fn test_broken_file_does_not_stop_the_run() {
    let report = run_fixture(Settings::default());
    assert_eq!(paths(&report, Category::SyntaxError), vec![PathBuf::from("shipping/legacy.py")]);
    assert_eq!(report.analyzer_errors.get("quality"), Some(&1));
    assert!(report.count(Category::ExactDuplicate) > 0);
}

#[test]
fn test_stale_and_documentation_findings() {
    let report = run_fixture(Settings::default());
    assert_eq!(
        paths(&report, Category::TemporaryFiles),
        vec![PathBuf::from("shipping/rules.py.bak")]
    );

    let references = &report.by_category[&Category::InvalidReference];
    assert!(references.iter().any(|f| f.description.contains("reconcile")));
    assert!(!references.iter().any(|f| f.description.contains("restock")));
    assert!(report.count(Category::ReadmeCompleteness) >= 1);
}

#[test]
fn test_high_threshold_keeps_only_high() {
    let report = run_fixture(Settings {
        severity_threshold: Severity::High,
        ..Settings::default()
    });
    assert!(report.findings().all(|f| f.severity == Severity::High));
    assert!(report.has_high());
    assert_eq!(report.priority_actions.len(), report.total_findings());
}
