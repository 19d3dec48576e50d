//! Analyzer contract and the concrete analyzers.
//!
//! Every analyzer receives an [`AnalyzerContext`] holding the run's shared
//! handles and processes files through [`AnalyzerContext::for_each_file`],
//! which checks memory before each file and turns per-file failures into
//! recorded errors instead of aborting.

mod conflicts;
mod documentation;
mod duplicates;
mod files;
mod quality;
mod types;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RunConfig;
use crate::engine::{
    AnalysisError, CacheStore, ErrorAccumulator, IncrementalTracker, MemoryGuard, NoCache,
    SourceCache,
};
use crate::error::{AnalysisFailure, ConfigError, SyntaxError};

pub use conflicts::ConflictAnalyzer;
pub use documentation::DocumentationAnalyzer;
pub use duplicates::{
    BlockKind, CodeBlock, DuplicateAnalyzer, DuplicateGroup, FunctionSignature, GroupKind,
};
pub use files::FileAnalyzer;
pub use quality::{LinterProbe, QualityAnalyzer};
pub use types::{filter_by_severity, AnalyzerOutput, Category, Finding, Severity, Summary};

/// An analysis pass over a file set.
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Analyze `files` (absolute paths). Never fails as a whole: per-file
    /// problems end up in the error accumulator or as `syntax_error` findings.
    fn analyze(&self, files: &[PathBuf]) -> AnalyzerOutput;
}

/// The built-in analyzers, selectable by name in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    Duplicates,
    Conflicts,
    Quality,
    Documentation,
    Files,
}

impl AnalyzerKind {
    pub const ALL: &'static [AnalyzerKind] = &[
        AnalyzerKind::Duplicates,
        AnalyzerKind::Conflicts,
        AnalyzerKind::Quality,
        AnalyzerKind::Documentation,
        AnalyzerKind::Files,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyzerKind::Duplicates => "duplicates",
            AnalyzerKind::Conflicts => "conflicts",
            AnalyzerKind::Quality => "quality",
            AnalyzerKind::Documentation => "documentation",
            AnalyzerKind::Files => "files",
        }
    }

    pub fn build(&self, ctx: AnalyzerContext) -> Box<dyn Analyzer> {
        match self {
            AnalyzerKind::Duplicates => Box::new(DuplicateAnalyzer::new(ctx)),
            AnalyzerKind::Conflicts => Box::new(ConflictAnalyzer::new(ctx)),
            AnalyzerKind::Quality => Box::new(QualityAnalyzer::new(ctx)),
            AnalyzerKind::Documentation => Box::new(DocumentationAnalyzer::new(ctx)),
            AnalyzerKind::Files => Box::new(FileAnalyzer::new(ctx)),
        }
    }
}

impl std::fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AnalyzerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnalyzerKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::UnknownAnalyzer(s.to_string()))
    }
}

/// Handles shared by all analyzers of one run.
#[derive(Clone)]
pub struct AnalyzerContext {
    pub config: Arc<RunConfig>,
    pub errors: Arc<ErrorAccumulator>,
    pub cache: Arc<dyn SourceCache>,
    pub tracker: Option<Arc<IncrementalTracker>>,
    pub memory: Arc<MemoryGuard>,
}

impl AnalyzerContext {
    /// Context with a fresh error accumulator, a cache chosen by
    /// `enable_caching` and a process memory guard.
    pub fn new(config: Arc<RunConfig>) -> Self {
        let cache: Arc<dyn SourceCache> = if config.settings().enable_caching {
            Arc::new(CacheStore::new(
                config.project_path(),
                config.cache_dir(),
                config.settings().max_cache_size_bytes,
            ))
        } else {
            Arc::new(NoCache::new(config.project_path()))
        };
        let memory = Arc::new(MemoryGuard::new(config.settings().memory_threshold_percent));
        Self {
            config,
            errors: Arc::new(ErrorAccumulator::new()),
            cache,
            tracker: None,
            memory,
        }
    }

    pub fn relative(&self, path: &Path) -> PathBuf {
        self.config.relative(path).to_path_buf()
    }

    /// Run `process` for every file behind a failure boundary.
    ///
    /// Findings a file produces are kept only if processing succeeds. A
    /// syntax error becomes a `syntax_error` finding and an error record;
    /// any other failure or panic is recorded and the file skipped.
    pub fn for_each_file<F>(
        &self,
        analyzer: &str,
        files: &[PathBuf],
        output: &mut AnalyzerOutput,
        mut process: F,
    ) where
        F: FnMut(&Path, &mut Vec<Finding>) -> Result<(), AnalysisFailure>,
    {
        for path in files {
            if self.memory.check().exceeded {
                debug!(analyzer, "clearing cache under memory pressure");
                self.cache.clear();
            }

            let rel = self.relative(path);
            let mut local = Vec::new();
            match catch_unwind(AssertUnwindSafe(|| process(path, &mut local))) {
                Ok(Ok(())) => {
                    output.findings.extend(local);
                    output.scanned += 1;
                }
                Ok(Err(failure)) => {
                    if let AnalysisFailure::Syntax(e) = &failure {
                        output.findings.push(syntax_finding(&rel, e));
                    }
                    self.errors
                        .record(AnalysisError::from_failure(analyzer, &rel, &failure));
                }
                Err(payload) => {
                    self.errors
                        .record(AnalysisError::panic(analyzer, &rel, panic_message(payload)));
                }
            }
        }
    }

    /// Apply the severity threshold and a deterministic order.
    pub fn finish(&self, mut output: AnalyzerOutput) -> AnalyzerOutput {
        let threshold = self.config.severity_threshold();
        output.findings = filter_by_severity(std::mem::take(&mut output.findings), threshold);
        output.findings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        output
    }
}

/// The finding every analyzer reports for an unparseable file.
pub fn syntax_finding(rel: &Path, error: &SyntaxError) -> Finding {
    Finding::new(
        Category::SyntaxError,
        Severity::High,
        rel,
        format!("syntax error at line {}: {}", error.line, error.message),
    )
    .at_line(error.line)
    .recommend("Fix the syntax error; the file was skipped by tree-based checks")
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::Settings;
    use std::fs;
    use tempfile::TempDir;

    /// Write `files` under a fresh temp dir and build a context for it.
    pub(crate) fn project(
        files: &[(&str, &str)],
        settings: Settings,
    ) -> (TempDir, AnalyzerContext, Vec<PathBuf>) {
        let temp = TempDir::new().unwrap();
        for (name, content) in files {
            let path = temp.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, content).unwrap();
        }
        let config = Arc::new(RunConfig::new(temp.path(), settings).unwrap());
        let ctx = AnalyzerContext::new(config.clone());
        let paths = crate::engine::resolve(&config).files;
        (temp, ctx, paths)
    }

    pub(crate) fn of_category(output: &AnalyzerOutput, category: Category) -> Vec<&Finding> {
        output
            .findings
            .iter()
            .filter(|f| f.category == category)
            .collect()
    }
}
