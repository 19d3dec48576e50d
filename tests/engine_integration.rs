//! End-to-end runs of the engine against small generated projects.

use std::fs;
use std::path::Path;

use codeaudit::{AnalyzerKind, Category, RunConfig, Runner, Settings, Severity};
use proptest::prelude::*;
use tempfile::TempDir;

const NORMALIZE: &str = r#"def normalize(values):
    total = 0
    for v in values:
        total += v
    scale = max(total, 1)
    return [v / scale for v in values]
"#;

fn project(files: &[(&str, &str)]) -> TempDir {
    let temp = TempDir::new().unwrap();
    for (name, content) in files {
        let path = temp.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
    temp
}

fn run(root: &Path, settings: Settings) -> codeaudit::Report {
    let config = RunConfig::new(root, settings).unwrap();
    Runner::new(config).run().unwrap()
}

#[test]
fn test_exact_duplicate_across_two_files() {
    let a = format!("import os\n\nLOCAL_A = os.sep\n\n{}", NORMALIZE);
    let b = format!(
        "CONFIG = {{}}\n\n\n{}\n\ndef other():\n    return CONFIG\n",
        NORMALIZE.replace("values", "items")
    );
    let temp = project(&[("a.py", &a), ("b.py", &b)]);
    let report = run(temp.path(), Settings::default());

    let exact = &report.by_category[&Category::ExactDuplicate];
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].severity, Severity::High);
    assert!(exact[0].description.contains("a.py"));
    assert!(exact[0].description.contains("b.py"));
    assert!(report.count(Category::RefactoringOpportunity) >= 1);
    assert!(report
        .priority_actions
        .iter()
        .any(|f| f.category == Category::ExactDuplicate));
}

#[test]
fn test_nested_function_reports_complexity_score() {
    let source = r#"def route(items, mode):
    for item in items:
        if item:
            for part in item:
                if part == mode:
                    return part
    return None
"#;
    let mut settings = Settings::default();
    settings.quality.complexity_threshold = 4;
    let temp = project(&[("router.py", source)]);
    let report = run(temp.path(), settings);

    let quality = &report.by_category[&Category::CodeQuality];
    assert_eq!(quality.len(), 1);
    assert!(quality[0].metric.unwrap() >= 5.0);
    assert!(quality[0].description.contains("complexity 5"));
}

#[test]
fn test_default_complexity_threshold_keeps_score_in_summary() {
    let source = r#"def route(items, mode):
    for item in items:
        if item:
            for part in item:
                if part == mode:
                    return part
    return None
"#;
    let temp = project(&[("router.py", source)]);
    let report = run(temp.path(), Settings::default());

    assert_eq!(report.count(Category::CodeQuality), 0);
    assert_eq!(report.analyzer_summaries["quality"]["max_complexity"], 5);
}

#[test]
fn test_file_cap_applies_to_file_inventory() {
    let temp = project(&[
        ("a.py", "VALUE = 1\n"),
        ("b.py", "VALUE = 1\n"),
        ("c.py", "VALUE = 1\n"),
    ]);
    let settings = Settings {
        max_files_per_analyzer: Some(1),
        ..Settings::default()
    };
    let report = run(temp.path(), settings);

    assert_eq!(report.files_scanned, 1);
    assert_eq!(report.count(Category::DuplicateFiles), 0);
    assert_eq!(report.analyzer_summaries["files"]["files_scanned"], 1);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.starts_with("file inventory truncated")));
}

#[test]
fn test_global_mutated_from_two_functions() {
    let source = r#"
registry = {}

def register(name):
    global registry
    registry = dict(registry, name=name)

def reset():
    global registry
    registry = {}
"#;
    let temp = project(&[("state.py", source)]);
    let report = run(temp.path(), Settings::default());

    let conflicts = &report.by_category[&Category::GlobalVariableConflict];
    assert_eq!(conflicts.len(), 1);
    assert!(conflicts[0].description.contains("register"));
    assert!(conflicts[0].description.contains("reset"));
}

#[test]
fn test_short_readme_is_incomplete_and_too_short() {
    let temp = project(&[
        ("README.md", "# Widget\n\nWidget turns gadgets into widgets.\n"),
        ("widget.py", "\"\"\"Widgets.\"\"\"\n"),
    ]);
    let report = run(temp.path(), Settings::default());

    assert!(report.count(Category::ReadmeCompleteness) >= 1);
    assert_eq!(report.count(Category::ReadmeLength), 1);
    assert_eq!(
        report.analyzer_summaries["documentation"]["readme_found"],
        serde_json::Value::Bool(true)
    );
}

#[test]
fn test_invalid_syntax_is_contained() {
    let temp = project(&[
        ("broken.py", "def broken(:\n    pass\n"),
        ("fine.py", "VALUE = 1\n"),
    ]);
    let report = run(temp.path(), Settings::default());

    // Every tree-based analyzer sees the same error; the report keeps one.
    assert_eq!(report.count(Category::SyntaxError), 1);
    assert_eq!(report.analyzer_errors.get("conflicts"), Some(&1));
    assert!(report.analyzer_errors.values().all(|count| *count == 1));
    assert_eq!(report.analyzer_summaries.len(), AnalyzerKind::ALL.len());
}

#[test]
fn test_open_without_close_is_always_a_leak() {
    let temp = project(&[(
        "loader.py",
        "def load(path):\n    handle = open(path)\n    return handle.read()\n",
    )]);
    let report = run(temp.path(), Settings::default());

    let leaks = &report.by_category[&Category::ResourceLeak];
    assert_eq!(leaks.len(), 1);
    assert_eq!(leaks[0].line_number, Some(2));
}

#[test]
fn test_identical_files_report_all_but_first() {
    let temp = project(&[
        ("a.py", "VALUE = 1\n"),
        ("b.py", "VALUE = 1\n"),
        ("c.py", "VALUE = 1\n"),
    ]);
    let report = run(temp.path(), Settings::default());

    let dups = &report.by_category[&Category::DuplicateFiles];
    assert_eq!(dups.len(), 2);
    assert!(dups.iter().all(|f| f.file_path != Path::new("a.py")));
}

#[test]
fn test_incremental_runs_only_see_changes() {
    let temp = project(&[("a.py", "A = 1\n"), ("b.py", "B = 2\n")]);
    let settings = || Settings {
        incremental_enabled: true,
        ..Settings::default()
    };

    let first = run(temp.path(), settings());
    assert_eq!(first.files_scanned, 2);

    let second = run(temp.path(), settings());
    assert_eq!(second.files_scanned, 0);

    fs::write(temp.path().join("b.py"), "B = 2\nC = 3\n").unwrap();
    let third = run(temp.path(), settings());
    assert_eq!(third.files_scanned, 1);
}

#[test]
fn test_cache_index_survives_runs() {
    let temp = project(&[("a.py", NORMALIZE), ("b.py", NORMALIZE)]);
    let first = run(temp.path(), Settings::default());
    assert!(temp
        .path()
        .join(".codeaudit_cache")
        .join("cache_index.json")
        .is_file());

    let second = run(temp.path(), Settings::default());
    assert_eq!(
        first.by_category[&Category::ExactDuplicate],
        second.by_category[&Category::ExactDuplicate]
    );
}

#[test]
fn test_invalid_config_is_fatal() {
    let temp = TempDir::new().unwrap();
    let settings = Settings {
        include_patterns: vec!["src/[".to_string()],
        ..Settings::default()
    };
    assert!(RunConfig::new(temp.path(), settings).is_err());
}

const MIXED: &str = r#"import json

registry = {}

def parse(raw):
    return int(raw)

def load(path):
    fh = open(path)
    return json.load(fh)

def update(name):
    global registry
    registry = {name: 1}

def clear():
    global registry
    registry = {}
"#;

fn threshold_strategy() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Low),
        Just(Severity::Medium),
        Just(Severity::High)
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(6))]

    #[test]
    fn threshold_yields_subset_of_low(threshold in threshold_strategy()) {
        let temp = project(&[("mixed.py", MIXED)]);
        let all = run(temp.path(), Settings { enable_caching: false, ..Settings::default() });
        let filtered = run(
            temp.path(),
            Settings {
                enable_caching: false,
                severity_threshold: threshold,
                ..Settings::default()
            },
        );

        let everything: Vec<_> = all.findings().collect();
        for finding in filtered.findings() {
            prop_assert!(finding.severity >= threshold);
            prop_assert!(everything.contains(&finding));
        }
    }
}
