//! Core types for analyzer results.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Severity levels for findings, ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    /// Whether a finding of this severity passes `threshold`.
    pub fn meets(&self, threshold: Severity) -> bool {
        *self >= threshold
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            _ => Err(ConfigError::InvalidSeverity(s.to_string())),
        }
    }
}

/// Finding categories. Each check reports under its own category so callers
/// can filter them individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SyntaxError,
    // Duplicate analyzer
    ExactDuplicate,
    SimilarCode,
    DuplicateFunctionName,
    RefactoringOpportunity,
    // Conflict analyzer
    GlobalVariableConflict,
    ThreadingIssue,
    ResourceLeak,
    UnhandledException,
    // Quality analyzer
    CodeQuality,
    LongFunction,
    TooManyParameters,
    LineTooLong,
    TrailingWhitespace,
    MixedIndentation,
    MultipleStatements,
    LintViolation,
    // Documentation analyzer
    DocstringCoverage,
    MissingDocstring,
    IncompleteDocstring,
    DocstringStyleInconsistency,
    ReadmeCompleteness,
    ReadmeLength,
    InvalidReference,
    // File analyzer
    TemporaryFiles,
    OutdatedFiles,
    DuplicateFiles,
}

impl Category {
    pub const ALL: &'static [Category] = &[
        Category::SyntaxError,
        Category::ExactDuplicate,
        Category::SimilarCode,
        Category::DuplicateFunctionName,
        Category::RefactoringOpportunity,
        Category::GlobalVariableConflict,
        Category::ThreadingIssue,
        Category::ResourceLeak,
        Category::UnhandledException,
        Category::CodeQuality,
        Category::LongFunction,
        Category::TooManyParameters,
        Category::LineTooLong,
        Category::TrailingWhitespace,
        Category::MixedIndentation,
        Category::MultipleStatements,
        Category::LintViolation,
        Category::DocstringCoverage,
        Category::MissingDocstring,
        Category::IncompleteDocstring,
        Category::DocstringStyleInconsistency,
        Category::ReadmeCompleteness,
        Category::ReadmeLength,
        Category::InvalidReference,
        Category::TemporaryFiles,
        Category::OutdatedFiles,
        Category::DuplicateFiles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::SyntaxError => "syntax_error",
            Category::ExactDuplicate => "exact_duplicate",
            Category::SimilarCode => "similar_code",
            Category::DuplicateFunctionName => "duplicate_function_name",
            Category::RefactoringOpportunity => "refactoring_opportunity",
            Category::GlobalVariableConflict => "global_variable_conflict",
            Category::ThreadingIssue => "threading_issue",
            Category::ResourceLeak => "resource_leak",
            Category::UnhandledException => "unhandled_exception",
            Category::CodeQuality => "code_quality",
            Category::LongFunction => "long_function",
            Category::TooManyParameters => "too_many_parameters",
            Category::LineTooLong => "line_too_long",
            Category::TrailingWhitespace => "trailing_whitespace",
            Category::MixedIndentation => "mixed_indentation",
            Category::MultipleStatements => "multiple_statements",
            Category::LintViolation => "lint_violation",
            Category::DocstringCoverage => "docstring_coverage",
            Category::MissingDocstring => "missing_docstring",
            Category::IncompleteDocstring => "incomplete_docstring",
            Category::DocstringStyleInconsistency => "docstring_style_inconsistency",
            Category::ReadmeCompleteness => "readme_completeness",
            Category::ReadmeLength => "readme_length",
            Category::InvalidReference => "invalid_reference",
            Category::TemporaryFiles => "temporary_files",
            Category::OutdatedFiles => "outdated_files",
            Category::DuplicateFiles => "duplicate_files",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Category::ALL.iter().copied().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single detected issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub category: Category,
    pub severity: Severity,
    pub description: String,
    /// Path relative to the project root.
    pub file_path: PathBuf,
    /// 1-indexed line, when the finding points at a location.
    pub line_number: Option<usize>,
    pub recommendation: String,
    /// Numeric measure behind the finding (complexity score, similarity ratio, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<f64>,
}

impl Finding {
    pub fn new(
        category: Category,
        severity: Severity,
        file_path: impl AsRef<Path>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            category,
            severity,
            description: description.into(),
            file_path: file_path.as_ref().to_path_buf(),
            line_number: None,
            recommendation: String::new(),
            metric: None,
        }
    }

    /// Build a finding from a textual severity, failing on anything other
    /// than low/medium/high.
    pub fn with_severity_str(
        category: Category,
        severity: &str,
        file_path: impl AsRef<Path>,
        description: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let severity = severity.parse::<Severity>()?;
        Ok(Self::new(category, severity, file_path, description))
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line_number = Some(line);
        self
    }

    pub fn recommend(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = recommendation.into();
        self
    }

    pub fn with_metric(mut self, metric: f64) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Create a unique key for this finding (for deduplication).
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.category,
            self.file_path.display(),
            self.line_number.unwrap_or(0),
            self.description
        )
    }

    /// Ordering used for deterministic output.
    pub fn sort_key(&self) -> (PathBuf, usize, Category, &str) {
        (
            self.file_path.clone(),
            self.line_number.unwrap_or(0),
            self.category,
            self.description.as_str(),
        )
    }
}

/// Drop findings below `threshold`, keeping order.
pub fn filter_by_severity(findings: Vec<Finding>, threshold: Severity) -> Vec<Finding> {
    findings
        .into_iter()
        .filter(|f| f.severity.meets(threshold))
        .collect()
}

/// Per-analyzer summary counters (`total_code_blocks`, `linter_available`, ...).
pub type Summary = BTreeMap<String, serde_json::Value>;

/// Everything one analyzer produced for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzerOutput {
    pub analyzer: String,
    pub findings: Vec<Finding>,
    pub summary: Summary,
    /// Number of files the analyzer processed without failure.
    pub scanned: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl AnalyzerOutput {
    pub fn new(analyzer: &str) -> Self {
        Self {
            analyzer: analyzer.to_string(),
            ..Default::default()
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.summary.insert(key.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_severity_parse_rejects_unknown() {
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert!(matches!(
            "critical".parse::<Severity>(),
            Err(ConfigError::InvalidSeverity(_))
        ));
        assert!(Finding::with_severity_str(Category::CodeQuality, "urgent", "a.py", "x").is_err());
    }

    #[test]
    fn test_category_round_trip_names() {
        for category in Category::ALL {
            assert_eq!(Category::parse(category.as_str()), Some(*category));
        }
        assert_eq!(Category::parse("nope"), None);
    }

    #[test]
    fn test_severity_serde_lowercase() {
        let json = serde_json::to_string(&Severity::Medium).unwrap();
        assert_eq!(json, "\"medium\"");
        assert!(serde_json::from_str::<Severity>("\"severe\"").is_err());
    }

    fn severity_strategy() -> impl Strategy<Value = Severity> {
        prop_oneof![
            Just(Severity::Low),
            Just(Severity::Medium),
            Just(Severity::High)
        ]
    }

    proptest! {
        #[test]
        fn high_threshold_is_subset_of_low(severities in proptest::collection::vec(severity_strategy(), 0..40)) {
            let findings: Vec<Finding> = severities
                .iter()
                .enumerate()
                .map(|(i, s)| Finding::new(Category::CodeQuality, *s, "m.py", format!("f{}", i)))
                .collect();

            let low = filter_by_severity(findings.clone(), Severity::Low);
            let high = filter_by_severity(findings.clone(), Severity::High);

            prop_assert_eq!(low.len(), findings.len());
            for f in &high {
                prop_assert_eq!(f.severity, Severity::High);
                prop_assert!(low.contains(f));
            }
        }
    }
}
