//! `# codeaudit:` comment directives that silence findings in Python source.
//!
//! A directive names a finding category (or `*`) and an optional reason after
//! a dash, e.g. `# codeaudit:ignore-next-line resource_leak - closed by caller`.
//! Plain `ignore` targets the line it trails, or the following line when the
//! comment stands alone. `ignore-file` is only honored near the top of a file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analyzers::{Category, Finding};
use crate::engine::SourceCache;

/// File-level directives are honored only within the header comments or the
/// first lines of a file.
const FILE_DIRECTIVE_LINES: usize = 10;

/// Which findings in the file a directive reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionScope {
    Line,
    NextLine,
    /// Every finding in the module, whatever its line.
    File,
}

/// One parsed directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suppression {
    /// A `Category` name such as `resource_leak`, or `*`.
    pub category: String,
    pub reason: String,
    pub file: PathBuf,
    /// 1-based line of the comment; 0 for `ignore-file`.
    pub line: usize,
    pub scope: SuppressionScope,
}

/// A silenced finding and the directive that silenced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressedFinding {
    pub finding: Finding,
    pub suppression: Suppression,
}

static DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"#\s*codeaudit:(ignore(?:-file|-next-line)?)\s+(\S+)\s*(?:-\s*(.*))?")
        .expect("suppression pattern is valid")
});

/// Extract the `# codeaudit:` directives from one module.
pub fn parse_suppressions(file: &Path, content: &str) -> Vec<Suppression> {
    let mut suppressions = Vec::new();
    let mut in_header = true;

    for (idx, line) in content.lines().enumerate() {
        let line_number = idx + 1;
        let trimmed = line.trim();
        if in_header && !(trimmed.is_empty() || trimmed.starts_with('#')) {
            in_header = false;
        }

        let Some(caps) = DIRECTIVE.captures(line) else {
            continue;
        };
        let directive = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let category = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let reason = caps
            .get(3)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();

        let scope = match directive {
            "ignore-file" => {
                if !in_header && line_number > FILE_DIRECTIVE_LINES {
                    continue;
                }
                SuppressionScope::File
            }
            "ignore-next-line" => SuppressionScope::NextLine,
            "ignore" => {
                // alone on its line: applies to the next one
                let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
                if line[..start].trim().is_empty() {
                    SuppressionScope::NextLine
                } else {
                    SuppressionScope::Line
                }
            }
            _ => continue,
        };

        if category != "*" && Category::parse(category).is_none() {
            debug!(file = %file.display(), line = line_number, category, "suppression names unknown category");
        }

        suppressions.push(Suppression {
            category: category.to_string(),
            reason,
            file: file.to_path_buf(),
            line: if scope == SuppressionScope::File {
                0
            } else {
                line_number
            },
            scope,
        });
    }

    suppressions
}

/// True when the directive covers the finding's file, category and line.
pub fn matches_suppression(finding: &Finding, suppression: &Suppression) -> bool {
    if finding.file_path != suppression.file {
        return false;
    }
    if suppression.category != "*" && suppression.category != finding.category.as_str() {
        return false;
    }

    match (suppression.scope, finding.line_number) {
        (SuppressionScope::File, _) => true,
        (SuppressionScope::Line, Some(line)) => line == suppression.line,
        (SuppressionScope::NextLine, Some(line)) => line == suppression.line + 1,
        (_, None) => false,
    }
}

/// Split findings into those still reported and those silenced.
pub fn filter_suppressed(
    findings: Vec<Finding>,
    suppressions: &HashMap<PathBuf, Vec<Suppression>>,
) -> (Vec<Finding>, Vec<SuppressedFinding>) {
    let mut active = Vec::new();
    let mut suppressed = Vec::new();

    for finding in findings {
        let matched = suppressions
            .get(&finding.file_path)
            .and_then(|list| list.iter().find(|s| matches_suppression(&finding, s)))
            .cloned();
        match matched {
            Some(suppression) => suppressed.push(SuppressedFinding {
                finding,
                suppression,
            }),
            None => active.push(finding),
        }
    }

    (active, suppressed)
}

/// Collect suppressions from every file, keyed by project-relative path.
/// Unreadable files are skipped.
pub fn collect_suppressions(
    cache: &dyn SourceCache,
    root: &Path,
    files: &[PathBuf],
) -> HashMap<PathBuf, Vec<Suppression>> {
    let mut result = HashMap::new();

    for path in files {
        let Ok(content) = cache.get_content(path) else {
            continue;
        };
        let rel = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        let suppressions = parse_suppressions(&rel, &content);
        if !suppressions.is_empty() {
            result.insert(rel, suppressions);
        }
    }

    result
}
