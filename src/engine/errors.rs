//! Per-file failures collected during a run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AnalysisFailure;

/// One analyzer failing on one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisError {
    pub analyzer_name: String,
    /// Path relative to the project root.
    pub file_path: PathBuf,
    pub message: String,
    pub cause: Option<String>,
    /// `syntax`, `io`, `internal` or `panic`.
    pub kind: String,
    pub timestamp: DateTime<Utc>,
}

impl AnalysisError {
    pub fn from_failure(analyzer: &str, file_path: &Path, failure: &AnalysisFailure) -> Self {
        let cause = std::error::Error::source(failure).map(|s| s.to_string());
        Self {
            analyzer_name: analyzer.to_string(),
            file_path: file_path.to_path_buf(),
            message: failure.to_string(),
            cause,
            kind: failure.kind().to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn panic(analyzer: &str, file_path: &Path, message: String) -> Self {
        Self {
            analyzer_name: analyzer.to_string(),
            file_path: file_path.to_path_buf(),
            message: format!("analyzer panicked: {}", message),
            cause: None,
            kind: "panic".to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only store shared by every analyzer of a run.
#[derive(Default)]
pub struct ErrorAccumulator {
    errors: Mutex<Vec<AnalysisError>>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, error: AnalysisError) {
        warn!(
            analyzer = %error.analyzer_name,
            path = %error.file_path.display(),
            kind = %error.kind,
            "{}",
            error.message
        );
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }

    pub fn len(&self) -> usize {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of everything recorded so far, in recording order.
    pub fn snapshot(&self) -> Vec<AnalysisError> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn counts_by_analyzer(&self) -> BTreeMap<String, usize> {
        count_by_analyzer(&self.snapshot())
    }
}

pub fn count_by_analyzer(errors: &[AnalysisError]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for e in errors {
        *counts.entry(e.analyzer_name.clone()).or_insert(0) += 1;
    }
    counts
}
