//! Resolving the set of files a run analyzes.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::RunConfig;

/// Directories never descended into, regardless of patterns.
const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Result of resolving a project tree.
#[derive(Debug, Clone, Default)]
pub struct FileSet {
    /// Absolute paths in traversal order.
    pub files: Vec<PathBuf>,
    /// Soft warnings (truncation and the like).
    pub warnings: Vec<String>,
    /// Files skipped because they exceed the size cap.
    pub oversized: usize,
}

impl FileSet {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn walk_project(config: &RunConfig) -> impl Iterator<Item = DirEntry> + '_ {
    let cache_dir = config.cache_dir().to_path_buf();
    WalkDir::new(config.project_path())
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |e| {
            if !e.file_type().is_dir() || e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !VCS_DIRS.contains(&name.as_ref()) && e.path() != cache_dir
        })
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
}

/// Walk the project and keep files that match an include pattern, match no
/// exclude pattern and fit under `max_file_size_bytes`.
///
/// Stat failures exclude the file silently. When `max_files_per_analyzer` is
/// set the result is cut to the first N files and a warning is recorded.
pub fn resolve(config: &RunConfig) -> FileSet {
    let settings = config.settings();
    let mut set = FileSet::default();

    for entry in walk_project(config) {
        let path = entry.path();
        let rel = config.relative(path);
        if !config.is_included(rel) || config.is_excluded(rel) {
            continue;
        }
        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot stat file, excluding");
                continue;
            }
        };
        if size > settings.max_file_size_bytes {
            set.oversized += 1;
            continue;
        }
        set.files.push(path.to_path_buf());
    }

    if let Some(message) = truncate(&mut set.files, settings.max_files_per_analyzer, "file set") {
        set.warnings.push(message);
    }

    debug!(files = set.files.len(), oversized = set.oversized, "resolved file set");
    set
}

/// Keep the first `limit` files in traversal order.
///
/// Returns the warning to surface when anything was dropped. A limit of
/// zero or `None` means no cap.
pub fn truncate(files: &mut Vec<PathBuf>, limit: Option<usize>, what: &str) -> Option<String> {
    let limit = limit.filter(|n| *n > 0)?;
    if files.len() <= limit {
        return None;
    }
    let message = format!(
        "{} truncated to {} of {} files (max_files_per_analyzer)",
        what,
        limit,
        files.len()
    );
    warn!("{}", message);
    files.truncate(limit);
    Some(message)
}

/// Every non-excluded file in the project regardless of include patterns.
///
/// Used by checks that look at non-source files (backups, lock files, ...).
pub fn inventory(config: &RunConfig) -> Vec<PathBuf> {
    walk_project(config)
        .map(|e| e.into_path())
        .filter(|p| !config.is_excluded(config.relative(p)))
        .collect()
}

/// Top-level directory of a project-relative path, if nested.
pub fn top_level_dir(rel: &Path) -> Option<String> {
    let mut components = rel.components();
    let first = components.next()?;
    components.next()?;
    Some(first.as_os_str().to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use std::fs;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("pkg")).unwrap();
        fs::create_dir_all(temp.path().join("__pycache__")).unwrap();
        fs::create_dir_all(temp.path().join(".git")).unwrap();
        fs::write(temp.path().join("main.py"), "print(1)\n").unwrap();
        fs::write(temp.path().join("pkg/util.py"), "x = 1\n").unwrap();
        fs::write(temp.path().join("pkg/notes.txt"), "hello\n").unwrap();
        fs::write(temp.path().join("__pycache__/main.py"), "x\n").unwrap();
        fs::write(temp.path().join(".git/hook.py"), "x\n").unwrap();
        temp
    }

    #[test]
    fn test_resolve_applies_patterns() {
        let temp = project();
        let config = RunConfig::with_defaults(temp.path()).unwrap();
        let set = resolve(&config);

        let rel: Vec<_> = set
            .files
            .iter()
            .map(|p| config.relative(p).to_path_buf())
            .collect();
        assert_eq!(rel, vec![PathBuf::from("main.py"), PathBuf::from("pkg/util.py")]);
        assert!(set.warnings.is_empty());
    }

    #[test]
    fn test_resolve_respects_size_cap() {
        let temp = project();
        fs::write(temp.path().join("big.py"), "x = 1\n".repeat(100)).unwrap();
        let settings = Settings {
            max_file_size_bytes: 50,
            ..Settings::default()
        };
        let config = RunConfig::new(temp.path(), settings).unwrap();
        let set = resolve(&config);
        assert_eq!(set.len(), 2);
        assert_eq!(set.oversized, 1);
    }

    #[test]
    fn test_resolve_truncates_with_warning() {
        let temp = project();
        let settings = Settings {
            max_files_per_analyzer: Some(1),
            ..Settings::default()
        };
        let config = RunConfig::new(temp.path(), settings).unwrap();
        let set = resolve(&config);
        assert_eq!(set.len(), 1);
        assert!(set.files[0].ends_with("main.py"));
        assert_eq!(set.warnings.len(), 1);
    }

    #[test]
    fn test_inventory_includes_non_python_files() {
        let temp = project();
        let config = RunConfig::with_defaults(temp.path()).unwrap();
        let files = inventory(&config);
        assert!(files.iter().any(|p| p.ends_with("notes.txt")));
        assert!(!files.iter().any(|p| p.ends_with("hook.py")));
    }

    #[test]
    fn test_truncate_ignores_zero_limit() {
        let mut files = vec![PathBuf::from("a.py"), PathBuf::from("b.py")];
        assert_eq!(truncate(&mut files, Some(0), "files"), None);
        assert_eq!(truncate(&mut files, Some(2), "files"), None);
        assert_eq!(files.len(), 2);

        let warning = truncate(&mut files, Some(1), "inventory").unwrap();
        assert!(warning.starts_with("inventory truncated to 1 of 2"));
        assert_eq!(files, vec![PathBuf::from("a.py")]);
    }

    #[test]
    fn test_top_level_dir() {
        assert_eq!(top_level_dir(Path::new("pkg/a.py")), Some("pkg".to_string()));
        assert_eq!(top_level_dir(Path::new("a.py")), None);
    }
}
