//! Stale, temporary and duplicated files.
//!
//! Unlike the tree-based analyzers this one looks at every non-excluded file
//! in the project, Python or not. Like the resolved source set, the inventory
//! is capped by `max_files_per_analyzer` and then narrowed to changed files on
//! incremental runs.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};

use crate::engine::files::top_level_dir;
use crate::engine::{inventory, truncate};
use crate::error::AnalysisFailure;

use super::{Analyzer, AnalyzerContext, AnalyzerOutput, Category, Finding, Severity};

const NAME: &str = "files";

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Suffixes of lock, swap and editor scratch files.
const HIGH_SUFFIXES: &[&str] = &["~", ".lock", ".pid", ".swp", ".swo"];

/// Suffixes of backup, cache and log files.
const MEDIUM_SUFFIXES: &[&str] = &[
    ".bak", ".backup", ".old", ".orig", ".rej", ".tmp", ".temp", ".cache", ".log", ".pyc",
];

/// Classify a file name as temporary, with the severity it warrants.
fn temp_tier(file_name: &str) -> Option<Severity> {
    let lower = file_name.to_lowercase();
    // emacs autosave (#name#) and lock (.#name) files
    let emacs = (lower.starts_with('#') && lower.ends_with('#') && lower.len() > 2)
        || lower.starts_with(".#");
    if emacs || HIGH_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return Some(Severity::High);
    }
    if MEDIUM_SUFFIXES.iter().any(|s| lower.ends_with(s))
        || lower == ".ds_store"
        || lower == "thumbs.db"
        || lower.contains(".backup.")
    {
        return Some(Severity::Medium);
    }
    None
}

fn is_binary(bytes: &[u8], sample: usize) -> bool {
    bytes.iter().take(sample).any(|&b| b == 0)
}

fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn age_days(modified: SystemTime, now: SystemTime) -> u64 {
    now.duration_since(modified)
        .unwrap_or(Duration::ZERO)
        .as_secs()
        / SECONDS_PER_DAY
}

pub struct FileAnalyzer {
    ctx: AnalyzerContext,
}

impl FileAnalyzer {
    pub fn new(ctx: AnalyzerContext) -> Self {
        Self { ctx }
    }
}

impl Analyzer for FileAnalyzer {
    fn name(&self) -> &'static str {
        NAME
    }

    /// Scans the project inventory rather than `files`, which only holds
    /// the source files matched by the include patterns.
    fn analyze(&self, _files: &[PathBuf]) -> AnalyzerOutput {
        let mut output = AnalyzerOutput::new(NAME);
        let config = &self.ctx.config;
        let settings = &config.settings().files;
        let max_size = config.settings().max_file_size_bytes;
        let now = SystemTime::now();

        let mut all_files = inventory(config);
        let limit = config.settings().max_files_per_analyzer;
        if let Some(warning) = truncate(&mut all_files, limit, "file inventory") {
            output.warnings.push(warning);
        }
        if let Some(tracker) = &self.ctx.tracker {
            all_files = tracker.changed_files(&all_files);
        }

        let mut by_hash: HashMap<String, Vec<(PathBuf, u64)>> = HashMap::new();
        let mut binary_files = 0usize;

        self.ctx.for_each_file(NAME, &all_files, &mut output, |path, findings| {
            let rel = self.ctx.relative(path);
            let meta = fs::metadata(path).map_err(|e| AnalysisFailure::io(&rel, e))?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            if let Some(severity) = temp_tier(&file_name) {
                findings.push(
                    Finding::new(
                        Category::TemporaryFiles,
                        severity,
                        &rel,
                        format!("`{}` looks like a temporary or backup file", rel.display()),
                    )
                    .recommend("Delete it and add the pattern to .gitignore"),
                );

                if let Ok(modified) = meta.modified() {
                    let age = age_days(modified, now);
                    if age > settings.outdated_days {
                        findings.push(
                            Finding::new(
                                Category::OutdatedFiles,
                                Severity::Medium,
                                &rel,
                                format!(
                                    "`{}` is a temporary file untouched for {} days",
                                    rel.display(),
                                    age
                                ),
                            )
                            .recommend("Remove stale temporary files from the tree")
                            .with_metric(age as f64),
                        );
                    }
                }
            }

            if meta.len() == 0 || meta.len() > max_size {
                return Ok(());
            }
            let bytes = fs::read(path).map_err(|e| AnalysisFailure::io(&rel, e))?;
            if is_binary(&bytes, settings.binary_sample_bytes) {
                binary_files += 1;
                return Ok(());
            }
            by_hash
                .entry(content_hash(&bytes))
                .or_default()
                .push((rel, meta.len()));
            Ok(())
        });

        // order groups by their first path so output does not depend on hashing
        let groups: BTreeMap<PathBuf, Vec<(PathBuf, u64)>> = by_hash
            .into_values()
            .filter(|paths| paths.len() >= 2)
            .filter_map(|paths| Some((paths.first()?.0.clone(), paths)))
            .collect();

        let mut duplicate_files = 0usize;
        let mut wasted_bytes = 0u64;
        for (original, copies) in &groups {
            let original_dir = top_level_dir(original);
            for (copy, size) in copies.iter().skip(1) {
                let copy_dir = top_level_dir(copy);
                let cross_module = copy_dir != original_dir;
                let mut description = format!(
                    "`{}` has the same content as `{}`",
                    copy.display(),
                    original.display()
                );
                if cross_module {
                    description.push_str(&format!(
                        " (across modules `{}` and `{}`)",
                        original_dir.as_deref().unwrap_or("."),
                        copy_dir.as_deref().unwrap_or(".")
                    ));
                }
                output.findings.push(
                    Finding::new(
                        Category::DuplicateFiles,
                        if cross_module { Severity::High } else { Severity::Medium },
                        copy,
                        description,
                    )
                    .recommend("Keep a single copy and import or reference it")
                    .with_metric(*size as f64),
                );
                duplicate_files += 1;
                wasted_bytes += size;
            }
        }

        let count = |category: Category| {
            output
                .findings
                .iter()
                .filter(|f| f.category == category)
                .count()
        };
        let temporary = count(Category::TemporaryFiles);
        let outdated = count(Category::OutdatedFiles);

        output.set("files_scanned", all_files.len());
        output.set("temporary_files", temporary);
        output.set("outdated_files", outdated);
        output.set("duplicate_files", duplicate_files);
        output.set("duplicate_groups", groups.len());
        output.set("binary_files", binary_files);
        output.set("wasted_bytes", wasted_bytes);

        self.ctx.finish(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::{of_category, project};
    use crate::config::Settings;
    use std::path::Path;

    fn analyze(files: &[(&str, &str)]) -> (tempfile::TempDir, AnalyzerOutput) {
        let (temp, ctx, paths) = project(files, Settings::default());
        let output = FileAnalyzer::new(ctx).analyze(&paths);
        (temp, output)
    }

    #[test]
    fn test_temp_tiers() {
        assert_eq!(temp_tier("notes.txt~"), Some(Severity::High));
        assert_eq!(temp_tier("server.pid"), Some(Severity::High));
        assert_eq!(temp_tier(".#draft.py"), Some(Severity::High));
        assert_eq!(temp_tier("#draft.py#"), Some(Severity::High));
        assert_eq!(temp_tier("config.py.bak"), Some(Severity::Medium));
        assert_eq!(temp_tier("debug.LOG"), Some(Severity::Medium));
        assert_eq!(temp_tier("module.py"), None);
        assert_eq!(temp_tier("lockfile.py"), None);
    }

    #[test]
    fn test_duplicates_report_all_but_first() {
        let (_temp, output) = analyze(&[
            ("a.py", "VALUE = 1\n"),
            ("b.py", "VALUE = 1\n"),
            ("c.py", "VALUE = 1\n"),
            ("d.py", "VALUE = 2\n"),
        ]);
        let dups = of_category(&output, Category::DuplicateFiles);
        assert_eq!(dups.len(), 2);
        assert!(dups.iter().all(|f| f.file_path != Path::new("a.py")));
        assert!(dups.iter().all(|f| f.severity == Severity::Medium));
        assert_eq!(output.summary["duplicate_groups"], 1);
    }

    #[test]
    fn test_inventory_respects_file_cap() {
        let settings = Settings {
            max_files_per_analyzer: Some(1),
            ..Settings::default()
        };
        let (_temp, ctx, paths) = project(
            &[("a.py", "VALUE = 1\n"), ("b.py", "VALUE = 1\n"), ("c.py", "VALUE = 1\n")],
            settings,
        );
        let output = FileAnalyzer::new(ctx).analyze(&paths);

        assert!(of_category(&output, Category::DuplicateFiles).is_empty());
        assert_eq!(output.summary["files_scanned"], 1);
        assert_eq!(output.warnings.len(), 1);
        assert!(output.warnings[0].contains("truncated to 1 of 3"));
    }

    #[test]
    fn test_cross_module_duplicate_is_high() {
        let (_temp, output) = analyze(&[
            ("billing/helpers.py", "def f():\n    return 1\n"),
            ("shipping/helpers.py", "def f():\n    return 1\n"),
        ]);
        let dups = of_category(&output, Category::DuplicateFiles);
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].severity, Severity::High);
        assert_eq!(dups[0].file_path, Path::new("shipping/helpers.py"));
        assert!(dups[0].description.contains("across modules"));
    }

    #[test]
    fn test_empty_and_binary_files_are_not_duplicates() {
        let temp = tempfile::TempDir::new().unwrap();
        fs::write(temp.path().join("__init__.py"), "").unwrap();
        fs::create_dir_all(temp.path().join("pkg")).unwrap();
        fs::write(temp.path().join("pkg/__init__.py"), "").unwrap();
        fs::write(temp.path().join("a.bin"), [0u8, 1, 2, 3]).unwrap();
        fs::write(temp.path().join("b.bin"), [0u8, 1, 2, 3]).unwrap();

        let config = std::sync::Arc::new(
            crate::config::RunConfig::new(temp.path(), Settings::default()).unwrap(),
        );
        let output = FileAnalyzer::new(AnalyzerContext::new(config)).analyze(&[]);
        assert!(of_category(&output, Category::DuplicateFiles).is_empty());
        assert_eq!(output.summary["binary_files"], 2);
    }

    #[test]
    fn test_outdated_temp_files() {
        let (temp, ctx, paths) = project(
            &[("old.bak", "x"), ("fresh.bak", "y"), ("old.py", "z = 1\n")],
            Settings::default(),
        );
        let long_ago = SystemTime::now() - Duration::from_secs(90 * SECONDS_PER_DAY);
        for name in ["old.bak", "old.py"] {
            fs::File::options()
                .write(true)
                .open(temp.path().join(name))
                .unwrap()
                .set_modified(long_ago)
                .unwrap();
        }

        let output = FileAnalyzer::new(ctx).analyze(&paths);
        assert_eq!(of_category(&output, Category::TemporaryFiles).len(), 2);
        let outdated = of_category(&output, Category::OutdatedFiles);
        assert_eq!(outdated.len(), 1);
        assert_eq!(outdated[0].file_path, Path::new("old.bak"));
        assert!(outdated[0].metric.unwrap() >= 89.0);
    }
}
