//! Change tracking between runs.
//!
//! The manifest maps project-relative paths to the signature each file had
//! when it was last analyzed. It is read once at construction, staged during
//! the run and only written by [`IncrementalTracker::save_state`].

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::cache::write_atomic;
use super::signature::ContentSignature;

const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    files: BTreeMap<String, ContentSignature>,
}

pub struct IncrementalTracker {
    root: PathBuf,
    manifest_path: PathBuf,
    previous: BTreeMap<String, ContentSignature>,
    staged: Mutex<HashMap<String, ContentSignature>>,
    /// Set when an existing manifest could not be read.
    load_warning: Option<String>,
}

impl IncrementalTracker {
    /// Load the manifest from `cache_dir`. Absent or corrupt manifests
    /// behave as empty, so every file counts as changed.
    pub fn load(root: impl Into<PathBuf>, cache_dir: &Path) -> Self {
        let manifest_path = cache_dir.join(MANIFEST_FILE);
        let (previous, load_warning) = match fs::read_to_string(&manifest_path) {
            Err(_) => (BTreeMap::new(), None),
            Ok(raw) => match serde_json::from_str::<Manifest>(&raw) {
                Ok(manifest) => {
                    debug!(files = manifest.files.len(), "loaded change manifest");
                    (manifest.files, None)
                }
                Err(e) => {
                    let message = format!(
                        "change manifest {} is corrupt ({}); treating all files as changed",
                        manifest_path.display(),
                        e
                    );
                    warn!("{}", message);
                    (BTreeMap::new(), Some(message))
                }
            },
        };

        Self {
            root: root.into(),
            manifest_path,
            previous,
            staged: Mutex::new(HashMap::new()),
            load_warning,
        }
    }

    pub fn load_warning(&self) -> Option<&str> {
        self.load_warning.as_deref()
    }

    fn key(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Candidates that are new or whose signature differs from the manifest.
    /// Files that cannot be stat'ed count as changed.
    pub fn changed_files(&self, candidates: &[PathBuf]) -> Vec<PathBuf> {
        candidates
            .iter()
            .filter(|path| match ContentSignature::of(path) {
                Ok(current) => self.previous.get(&self.key(path)) != Some(&current),
                Err(_) => true,
            })
            .cloned()
            .collect()
    }

    /// Stage the file's current signature for the next [`save_state`](Self::save_state).
    pub fn mark_file_analyzed(&self, path: &Path) {
        match ContentSignature::of(path) {
            Ok(signature) => {
                self.staged
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(self.key(path), signature);
            }
            Err(e) => debug!(path = %path.display(), error = %e, "not marking unreadable file"),
        }
    }

    pub fn staged_count(&self) -> usize {
        self.staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Merge staged signatures into the manifest and write it atomically.
    pub fn save_state(&self) -> anyhow::Result<()> {
        let staged = self
            .staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut files = self.previous.clone();
        files.extend(staged);
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            files,
        };

        if let Some(dir) = self.manifest_path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating cache directory {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(&manifest)?;
        write_atomic(&self.manifest_path, json.as_bytes())?;
        info!(files = manifest.files.len(), "saved change manifest");
        Ok(())
    }
}
