//! Cheap content signatures (size + modification time).

use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

/// Identifies one version of a file on disk without reading it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentSignature {
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: u128,
}

impl ContentSignature {
    pub fn from_metadata(meta: &fs::Metadata) -> Self {
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self {
            size: meta.len(),
            mtime_ns,
        }
    }

    pub fn of(path: &Path) -> std::io::Result<Self> {
        fs::metadata(path).map(|m| Self::from_metadata(&m))
    }
}
