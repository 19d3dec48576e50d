//! Error taxonomy for the analysis engine.
//!
//! Only [`ConfigError`] aborts a run. Everything else is downgraded at the
//! per-file analyzer boundary into an [`crate::engine::AnalysisError`] record
//! or a `syntax_error` finding.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid run configuration. Fatal: raised before any analyzer runs.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("project path does not exist: {0}")]
    MissingProjectPath(PathBuf),
    #[error("project path is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("invalid glob pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("unknown severity: {0}")]
    InvalidSeverity(String),
    #[error("unknown analysis depth: {0}")]
    InvalidDepth(String),
    #[error("unknown analyzer: {0}")]
    UnknownAnalyzer(String),
    #[error("reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// A file that could not be parsed as Python.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{path}:{line}: {message}")]
pub struct SyntaxError {
    pub path: String,
    /// 1-indexed line of the first invalid node.
    pub line: usize,
    pub message: String,
}

/// Failure while processing a single file inside one analyzer.
#[derive(Error, Debug)]
pub enum AnalysisFailure {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("internal analyzer error: {0}")]
    Internal(String),
}

impl AnalysisFailure {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AnalysisFailure::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable kind, used in error summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisFailure::Syntax(_) => "syntax",
            AnalysisFailure::Io { .. } => "io",
            AnalysisFailure::Internal(_) => "internal",
        }
    }
}
