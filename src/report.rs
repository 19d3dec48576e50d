//! Report aggregation and output formatting.
//!
//! [`Report::build`] merges the findings of every analyzer into summary
//! counts, a per-category index, priority actions and recommendations.
//! Two renderers are provided:
//! - Pretty: colored terminal output for human readability
//! - JSON: the report serialized as-is for programmatic consumption

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use colored::*;
use phf::phf_map;
use serde::{Deserialize, Serialize};

use crate::analyzers::{Category, Finding, Severity, Summary};
use crate::engine::{count_by_analyzer, AnalysisError, CacheStats};
use crate::suppress::SuppressedFinding;

/// One recommendation line per category present in a report.
static RECOMMENDATIONS: phf::Map<&'static str, &'static str> = phf_map! {
    "syntax_error" => "Fix files that fail to parse; they are skipped by every tree-based check.",
    "exact_duplicate" => "Consolidate structurally identical code into a single shared implementation.",
    "similar_code" => "Review near-duplicate blocks and factor out the common logic.",
    "duplicate_function_name" => "Rename or reconcile functions that share a name but have drifted apart.",
    "refactoring_opportunity" => "Extract duplicated blocks into a shared module and import it where needed.",
    "global_variable_conflict" => "Encapsulate module-level state written from several functions behind a class or explicit parameters.",
    "threading_issue" => "Guard shared state touched by thread entry points with a lock or pass data through a queue.",
    "resource_leak" => "Acquire files, sockets and locks in `with` blocks so they are released on every path.",
    "unhandled_exception" => "Wrap risky calls in try/except blocks that name the errors they can raise.",
    "code_quality" => "Split functions with high cyclomatic complexity into smaller, focused helpers.",
    "long_function" => "Break long functions into smaller units with a single responsibility.",
    "too_many_parameters" => "Group related parameters into a dataclass or configuration object.",
    "line_too_long" => "Wrap long lines or run a formatter with a consistent line length.",
    "trailing_whitespace" => "Strip trailing whitespace, ideally via an editor setting or pre-commit hook.",
    "mixed_indentation" => "Indent with spaces only, as recommended by PEP 8.",
    "multiple_statements" => "Put each statement on its own line.",
    "lint_violation" => "Address the issues reported by the external linter.",
    "docstring_coverage" => "Raise docstring coverage for modules below the configured threshold.",
    "missing_docstring" => "Add docstrings to public functions, classes and modules.",
    "incomplete_docstring" => "Document every parameter and the return value in function docstrings.",
    "docstring_style_inconsistency" => "Pick one docstring convention (Google or Sphinx) per module.",
    "readme_completeness" => "Add the missing README sections: introduction, installation, usage and API docs.",
    "readme_length" => "Expand the README with enough detail for a new contributor to get started.",
    "invalid_reference" => "Update documentation that points at files or symbols which no longer exist.",
    "temporary_files" => "Delete temporary and backup files and ignore them in version control.",
    "outdated_files" => "Remove stale temporary files that have not changed in a long time.",
    "duplicate_files" => "Keep one copy of duplicated files and reference it from everywhere else.",
};

/// Recommendation text for a category.
pub fn recommendation_for(category: Category) -> &'static str {
    RECOMMENDATIONS
        .get(category.as_str())
        .copied()
        .unwrap_or("Review the reported findings.")
}

/// Aggregated result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub project_path: PathBuf,
    #[serde(default)]
    pub files_scanned: usize,
    /// Finding count per category.
    pub summary: BTreeMap<Category, usize>,
    pub by_category: BTreeMap<Category, Vec<Finding>>,
    pub priority_actions: Vec<Finding>,
    pub recommendations: Vec<String>,
    /// Failure count per analyzer.
    pub analyzer_errors: BTreeMap<String, usize>,
    #[serde(default)]
    pub analyzer_summaries: BTreeMap<String, Summary>,
    #[serde(default)]
    pub errors: Vec<AnalysisError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppressed: Vec<SuppressedFinding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub cache: CacheStats,
}

impl Report {
    /// Aggregate findings and errors.
    ///
    /// Identical findings (same category, file, line and description) are
    /// kept once. Priority actions are every high finding or, when there is
    /// none, the first medium one.
    pub fn build(findings: Vec<Finding>, errors: Vec<AnalysisError>) -> Self {
        let mut findings = findings;
        findings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        let mut seen = HashSet::new();
        findings.retain(|f| seen.insert(f.key()));

        let mut summary: BTreeMap<Category, usize> = BTreeMap::new();
        let mut by_category: BTreeMap<Category, Vec<Finding>> = BTreeMap::new();
        for finding in &findings {
            *summary.entry(finding.category).or_default() += 1;
            by_category
                .entry(finding.category)
                .or_default()
                .push(finding.clone());
        }

        let mut priority_actions: Vec<Finding> = findings
            .iter()
            .filter(|f| f.severity == Severity::High)
            .cloned()
            .collect();
        if priority_actions.is_empty() {
            priority_actions.extend(
                findings
                    .iter()
                    .find(|f| f.severity == Severity::Medium)
                    .cloned(),
            );
        }

        let recommendations = summary
            .keys()
            .map(|c| recommendation_for(*c).to_string())
            .collect();

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: Utc::now(),
            project_path: PathBuf::new(),
            files_scanned: 0,
            summary,
            by_category,
            priority_actions,
            recommendations,
            analyzer_errors: count_by_analyzer(&errors),
            analyzer_summaries: BTreeMap::new(),
            errors,
            suppressed: Vec::new(),
            warnings: Vec::new(),
            cache: CacheStats::default(),
        }
    }

    /// All active findings in category order.
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.by_category.values().flatten()
    }

    pub fn total_findings(&self) -> usize {
        self.summary.values().sum()
    }

    pub fn count(&self, category: Category) -> usize {
        self.summary.get(&category).copied().unwrap_or(0)
    }

    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.findings().filter(|f| f.severity == severity).count()
    }

    pub fn has_high(&self) -> bool {
        self.count_by_severity(Severity::High) > 0
    }
}

// =============================================================================
// JSON Format
// =============================================================================

/// Write the report as pretty-printed JSON to stdout.
pub fn write_json(report: &Report) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    println!("{}", json);
    Ok(())
}

// =============================================================================
// Pretty Format
// =============================================================================

/// Write the report in pretty (human-readable) format.
pub fn write_pretty(report: &Report, show_suppressed: bool) {
    // Header
    println!();
    print!("  ");
    print!("{}", "codeaudit".cyan().bold());
    println!(" v{}", report.version);
    println!();

    print!("  {}", "Scanning: ".dimmed());
    println!("{}", report.project_path.display());
    print!("  {}", "Files:    ".dimmed());
    println!("{}", report.files_scanned);
    println!();

    write_result_summary(report);
    println!();

    if !report.priority_actions.is_empty() {
        write_priority_actions(&report.priority_actions);
        println!();
    }

    if !report.summary.is_empty() {
        write_breakdown(report);
        println!();
    }

    if !report.recommendations.is_empty() {
        println!("  {}", "Recommendations:".bold());
        for line in &report.recommendations {
            println!("    - {}", line);
        }
        println!();
    }

    if !report.suppressed.is_empty() {
        write_suppressed_summary(&report.suppressed, show_suppressed);
        println!();
    }

    if !report.analyzer_errors.is_empty() || !report.warnings.is_empty() {
        write_problems(report);
        println!();
    }
}

fn write_result_summary(report: &Report) {
    let high = report.count_by_severity(Severity::High);
    if high == 0 {
        print!("  {}", "✓ PASS".green());
    } else {
        print!("  {}", "✗ FAIL".red());
    }

    print!("  Findings: {}", report.total_findings().to_string().bold());
    print!("  (");
    write_severity_count(Severity::High, high);
    print!(", ");
    write_severity_count(Severity::Medium, report.count_by_severity(Severity::Medium));
    print!(", ");
    write_severity_count(Severity::Low, report.count_by_severity(Severity::Low));
    print!(")");

    if !report.suppressed.is_empty() {
        print!(
            "  {}",
            format!("({} suppressed)", report.suppressed.len()).dimmed()
        );
    }
    println!();
}

fn write_severity_count(severity: Severity, count: usize) {
    let text = format!("{} {}", count, severity);
    match severity {
        Severity::High if count > 0 => print!("{}", text.red()),
        Severity::Medium if count > 0 => print!("{}", text.yellow()),
        _ => print!("{}", text.dimmed()),
    }
}

fn write_priority_actions(actions: &[Finding]) {
    println!("  {} ({}):", "Priority actions".bold(), actions.len());
    println!();

    for f in actions {
        write_severity_tag(f.severity);
        print!("   ");
        print!("{:<26}", f.category.as_str().dimmed());
        print!("{}", f.file_path.display().to_string().blue());
        if let Some(line) = f.line_number {
            print!("{}", format!(":{}", line).dimmed());
        }
        println!();

        // Description on next line, indented
        println!("            {}", f.description);
        if !f.recommendation.is_empty() {
            println!("            {}", f.recommendation.dimmed());
        }
        println!();
    }
}

fn write_severity_tag(severity: Severity) {
    match severity {
        Severity::High => print!("    {} ", "HIGH".red()),
        Severity::Medium => print!("    {} ", "MED ".yellow()),
        Severity::Low => print!("    {} ", "LOW ".blue()),
    }
}

fn write_breakdown(report: &Report) {
    println!("  {}", "Breakdown:".bold());

    // Sort categories by count descending
    let mut categories: Vec<(&Category, &usize)> = report.summary.iter().collect();
    categories.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

    for (category, count) in categories {
        let plural = if *count != 1 { "s" } else { "" };
        println!(
            "    {:<30} {:>4} finding{}",
            category.as_str(),
            count,
            plural
        );
    }
}

fn write_suppressed_summary(suppressed: &[SuppressedFinding], show_details: bool) {
    println!("  {} ({}):", "Suppressed".dimmed(), suppressed.len());

    if !show_details {
        println!("    {}", "(use --show-suppressed to see details)".dimmed());
        return;
    }

    for sf in suppressed {
        let f = &sf.finding;
        let location = match f.line_number {
            Some(line) => format!("{}:{}", f.file_path.display(), line),
            None => f.file_path.display().to_string(),
        };
        print!("    {:<26}{}", f.category.as_str().dimmed(), location.dimmed());
        if !sf.suppression.reason.is_empty() {
            print!("  {}", format!("({})", sf.suppression.reason).dimmed());
        }
        println!();
    }
}

fn write_problems(report: &Report) {
    println!("  {}", "Run problems:".yellow().bold());
    for (analyzer, count) in &report.analyzer_errors {
        let plural = if *count != 1 { "s" } else { "" };
        println!("    {:<16} {} file{} failed", analyzer, count, plural);
    }
    for warning in &report.warnings {
        println!("    {}", warning.dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisFailure;
    use std::path::Path;

    fn finding(category: Category, severity: Severity, file: &str, line: usize) -> Finding {
        Finding::new(category, severity, file, format!("{} in {}", category, file)).at_line(line)
    }

    #[test]
    fn test_priority_actions_are_all_high() {
        let report = Report::build(
            vec![
                finding(Category::ResourceLeak, Severity::High, "a.py", 3),
                finding(Category::ExactDuplicate, Severity::High, "b.py", 1),
                finding(Category::SimilarCode, Severity::Medium, "c.py", 1),
            ],
            Vec::new(),
        );
        assert_eq!(report.priority_actions.len(), 2);
        assert!(report
            .priority_actions
            .iter()
            .all(|f| f.severity == Severity::High));
    }

    #[test]
    fn test_priority_falls_back_to_one_medium() {
        let report = Report::build(
            vec![
                finding(Category::SimilarCode, Severity::Medium, "b.py", 1),
                finding(Category::SimilarCode, Severity::Medium, "a.py", 1),
                finding(Category::LineTooLong, Severity::Low, "a.py", 2),
            ],
            Vec::new(),
        );
        assert_eq!(report.priority_actions.len(), 1);
        assert_eq!(report.priority_actions[0].file_path, Path::new("a.py"));

        let quiet = Report::build(
            vec![finding(Category::LineTooLong, Severity::Low, "a.py", 2)],
            Vec::new(),
        );
        assert!(quiet.priority_actions.is_empty());
    }

    #[test]
    fn test_summary_and_recommendations_per_category() {
        let report = Report::build(
            vec![
                finding(Category::MissingDocstring, Severity::Low, "a.py", 1),
                finding(Category::MissingDocstring, Severity::Low, "a.py", 9),
                finding(Category::ResourceLeak, Severity::High, "b.py", 4),
            ],
            Vec::new(),
        );
        assert_eq!(report.count(Category::MissingDocstring), 2);
        assert_eq!(report.count(Category::ResourceLeak), 1);
        assert_eq!(report.total_findings(), 3);
        assert_eq!(report.recommendations.len(), 2);
        assert_eq!(report.by_category[&Category::MissingDocstring].len(), 2);
    }

    #[test]
    fn test_identical_findings_are_merged() {
        let dup = finding(Category::SyntaxError, Severity::High, "bad.py", 1);
        let report = Report::build(vec![dup.clone(), dup.clone(), dup], Vec::new());
        assert_eq!(report.count(Category::SyntaxError), 1);
    }

    #[test]
    fn test_analyzer_errors_counted() {
        let failure = AnalysisFailure::Internal("boom".to_string());
        let errors = vec![
            AnalysisError::from_failure("quality", Path::new("a.py"), &failure),
            AnalysisError::from_failure("quality", Path::new("b.py"), &failure),
            AnalysisError::from_failure("files", Path::new("c.py"), &failure),
        ];
        let report = Report::build(Vec::new(), errors);
        assert_eq!(report.analyzer_errors["quality"], 2);
        assert_eq!(report.analyzer_errors["files"], 1);
        assert_eq!(report.errors.len(), 3);
        assert!(report.priority_actions.is_empty());
    }

    #[test]
    fn test_every_category_has_a_recommendation() {
        for category in Category::ALL {
            assert!(RECOMMENDATIONS.contains_key(category.as_str()), "{}", category);
        }
    }

    #[test]
    fn test_json_uses_category_names() {
        let report = Report::build(
            vec![finding(Category::ResourceLeak, Severity::High, "a.py", 3)],
            Vec::new(),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["summary"]["resource_leak"], 1);
        assert_eq!(json["priority_actions"][0]["severity"], "high");

        let back: Report = serde_json::from_value(json).unwrap();
        assert_eq!(back.count(Category::ResourceLeak), 1);
    }
}
