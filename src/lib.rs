//! Codeaudit - static analysis for Python source trees.
//!
//! Codeaudit walks a project, parses every Python file with tree-sitter and
//! runs a set of independent analyzers over the syntax trees. Their findings
//! are merged into a prioritized [`Report`].
//!
//! # Architecture
//!
//! - `config`: YAML settings and the validated, immutable run configuration
//! - `engine`: file resolution, parse cache, change tracking, memory guard
//!   and the per-run error accumulator
//! - `syntax`: Python parsing, typed node views, visitors and declaration facts
//! - `analyzers`: the analyzer contract and the five built-in analyzers
//! - `suppress`: inline `# codeaudit:ignore` directives
//! - `report`: aggregation and output formatting (pretty, JSON)
//! - `runner`: orchestration of one run
//!
//! # Example
//!
//! ```no_run
//! use codeaudit::{RunConfig, Runner};
//!
//! let config = RunConfig::with_defaults("path/to/project")?;
//! let report = Runner::new(config).run()?;
//! for finding in &report.priority_actions {
//!     println!("{}: {}", finding.file_path.display(), finding.description);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod analyzers;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod report;
pub mod runner;
pub mod suppress;
pub mod syntax;

pub use analyzers::{
    Analyzer, AnalyzerContext, AnalyzerKind, AnalyzerOutput, Category, Finding, Severity,
};
pub use config::{AnalysisDepth, RunConfig, Settings};
pub use engine::{AnalysisError, CacheStore, IncrementalTracker, MemoryGuard, NoCache, SourceCache};
pub use error::{AnalysisFailure, ConfigError, SyntaxError};
pub use report::Report;
pub use runner::Runner;
pub use suppress::{SuppressedFinding, Suppression};
