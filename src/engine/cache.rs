//! Size-bounded cache of file contents and parse trees.
//!
//! Entries are keyed by absolute path and validated against a
//! [`ContentSignature`] on every access. Each entry initializes its content
//! and tree at most once through per-entry cells, so concurrent analyzers
//! asking for the same file trigger a single read and a single parse without
//! serializing lookups for unrelated files.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::signature::ContentSignature;
use crate::error::{AnalysisFailure, SyntaxError};
use crate::syntax::{parse_python, ParsedFile};

const INDEX_FILE: &str = "cache_index.json";
const INDEX_VERSION: u32 = 1;

/// Source access shared by every analyzer in a run.
pub trait SourceCache: Send + Sync {
    /// File content, decoded as UTF-8 (invalid sequences replaced).
    fn get_content(&self, path: &Path) -> Result<Arc<str>, AnalysisFailure>;

    /// Parsed tree, or the syntax error the file produced.
    fn get_tree(&self, path: &Path) -> Result<Arc<ParsedFile>, AnalysisFailure>;

    /// Drop every entry not currently in use.
    fn clear(&self);

    fn stats(&self) -> CacheStats;

    /// False for the pass-through implementation.
    fn enabled(&self) -> bool;
}

/// Counters reported alongside the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub parses: u64,
    pub invalidations: u64,
    pub evictions: u64,
    pub clears: u64,
}

struct CacheEntry {
    signature: ContentSignature,
    content: OnceCell<Arc<str>>,
    tree: OnceCell<Result<Arc<ParsedFile>, SyntaxError>>,
    last_access: AtomicU64,
    pins: AtomicUsize,
    size: AtomicU64,
}

impl CacheEntry {
    fn new(signature: ContentSignature) -> Self {
        Self {
            signature,
            content: OnceCell::new(),
            tree: OnceCell::new(),
            last_access: AtomicU64::new(0),
            pins: AtomicUsize::new(0),
            size: AtomicU64::new(0),
        }
    }

    fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::Acquire) > 0
    }

    /// Detach the entry from the byte budget and return what it held.
    /// Later `account` calls on a retired entry are refunded.
    fn retire(&self) -> u64 {
        match self.size.swap(RETIRED, Ordering::AcqRel) {
            RETIRED => 0,
            size => size,
        }
    }
}

/// Size marker for entries no longer counted in `total_bytes`.
const RETIRED: u64 = u64::MAX;

/// Keeps an entry safe from eviction while a lookup is in flight.
struct Pin(Arc<CacheEntry>);

impl Pin {
    fn new(entry: Arc<CacheEntry>) -> Self {
        entry.pins.fetch_add(1, Ordering::AcqRel);
        Pin(entry)
    }
}

impl Drop for Pin {
    fn drop(&mut self) {
        self.0.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::ops::Deref for Pin {
    type Target = CacheEntry;

    fn deref(&self) -> &CacheEntry {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRecord {
    signature: ContentSignature,
    /// Set when this version of the file failed to parse.
    #[serde(default)]
    syntax_error: Option<SyntaxError>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, IndexRecord>,
}

/// The real cache.
pub struct CacheStore {
    root: PathBuf,
    dir: PathBuf,
    max_bytes: u64,
    entries: DashMap<PathBuf, Arc<CacheEntry>>,
    /// Signatures loaded from a previous process, keyed by relative path.
    known: DashMap<String, IndexRecord>,
    clock: AtomicU64,
    total_bytes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    parses: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
    clears: AtomicU64,
}

impl CacheStore {
    /// Cache for files under `root`, persisting its index in `dir`.
    pub fn new(root: impl Into<PathBuf>, dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            root: root.into(),
            dir: dir.into(),
            max_bytes,
            entries: DashMap::new(),
            known: DashMap::new(),
            clock: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            parses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            clears: AtomicU64::new(0),
        }
    }

    fn rel_key(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Look up (or create) the entry for the file's current signature.
    fn pinned_entry(&self, path: &Path) -> Result<Pin, AnalysisFailure> {
        let signature =
            ContentSignature::of(path).map_err(|e| AnalysisFailure::io(self.rel_key(path), e))?;
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);

        let entry = match self.entries.entry(path.to_path_buf()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().signature == signature {
                    occupied.get().clone()
                } else {
                    self.invalidations.fetch_add(1, Ordering::Relaxed);
                    self.release(occupied.get().retire());
                    let fresh = Arc::new(CacheEntry::new(signature));
                    occupied.insert(fresh.clone());
                    debug!(path = %path.display(), "cache entry invalidated");
                    fresh
                }
            }
            Entry::Vacant(vacant) => vacant.insert(Arc::new(CacheEntry::new(signature))).clone(),
        };
        // The map shard lock is released before the pin is handed out.
        entry.last_access.store(tick, Ordering::Relaxed);
        Ok(Pin::new(entry))
    }

    /// Charge `bytes` to the budget, then to the entry. The total is bumped
    /// first so a concurrent `retire` never subtracts bytes not yet counted.
    fn account(&self, entry: &CacheEntry, bytes: u64) {
        let total = self.total_bytes.fetch_add(bytes, Ordering::AcqRel) + bytes;
        let charged = entry
            .size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| {
                (size != RETIRED).then(|| size + bytes)
            })
            .is_ok();
        if !charged {
            self.release(bytes);
            return;
        }
        if total > self.max_bytes {
            self.evict_lru();
        }
    }

    fn release(&self, bytes: u64) {
        let _ = self
            .total_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |total| {
                Some(total.saturating_sub(bytes))
            });
    }

    /// Evict least-recently-used, unpinned entries until under budget.
    fn evict_lru(&self) {
        let mut candidates: Vec<(PathBuf, u64)> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_pinned())
            .map(|e| (e.key().clone(), e.value().last_access.load(Ordering::Relaxed)))
            .collect();
        candidates.sort_by_key(|(_, tick)| *tick);

        for (path, _) in candidates {
            if self.total_bytes.load(Ordering::Relaxed) <= self.max_bytes {
                break;
            }
            if let Some((_, entry)) = self.entries.remove_if(&path, |_, e| !e.is_pinned()) {
                self.release(entry.retire());
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn content_of(&self, path: &Path, entry: &CacheEntry) -> Result<Arc<str>, AnalysisFailure> {
        if let Some(content) = entry.content.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(content.clone());
        }
        let content = entry.content.get_or_try_init(|| {
            self.misses.fetch_add(1, Ordering::Relaxed);
            let text = read_source(path, &self.rel_key(path))?;
            self.account(entry, text.len() as u64);
            Ok::<_, AnalysisFailure>(text)
        })?;
        Ok(content.clone())
    }

    /// Load the signature index written by a previous run.
    ///
    /// A missing or unreadable index is not an error; it just means nothing
    /// is known yet.
    pub fn load_from_disk(&self) -> usize {
        let path = self.dir.join(INDEX_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return 0,
        };
        let index: CacheIndex = match serde_json::from_str(&raw) {
            Ok(index) => index,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt cache index");
                return 0;
            }
        };
        let count = index.entries.len();
        for (key, record) in index.entries {
            self.known.insert(key, record);
        }
        debug!(entries = count, "loaded cache index");
        count
    }

    /// Persist the signature table (not the trees) atomically.
    pub fn save_to_disk(&self) -> anyhow::Result<()> {
        let mut index = CacheIndex {
            version: INDEX_VERSION,
            entries: self
                .known
                .iter()
                .map(|r| (r.key().clone(), r.value().clone()))
                .collect(),
        };
        for item in self.entries.iter() {
            let syntax_error = match item.value().tree.get() {
                Some(Err(e)) => Some(e.clone()),
                _ => None,
            };
            index.entries.insert(
                self.rel_key(item.key()),
                IndexRecord {
                    signature: item.value().signature,
                    syntax_error,
                },
            );
        }

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating cache directory {}", self.dir.display()))?;
        let json = serde_json::to_string_pretty(&index)?;
        write_atomic(&self.dir.join(INDEX_FILE), json.as_bytes())?;
        info!(entries = index.entries.len(), "saved cache index");
        Ok(())
    }
}

impl SourceCache for CacheStore {
    fn get_content(&self, path: &Path) -> Result<Arc<str>, AnalysisFailure> {
        let entry = self.pinned_entry(path)?;
        self.content_of(path, &entry)
    }

    fn get_tree(&self, path: &Path) -> Result<Arc<ParsedFile>, AnalysisFailure> {
        let entry = self.pinned_entry(path)?;
        let key = self.rel_key(path);

        if entry.tree.get().is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else if let Some(record) = self.known.get(&key) {
            if record.signature == entry.signature {
                if let Some(err) = &record.syntax_error {
                    // Known-bad version from an earlier run; skip the parse.
                    let _ = entry.tree.set(Err(err.clone()));
                }
            }
        }

        let outcome = entry.tree.get_or_try_init(
            || -> Result<Result<Arc<ParsedFile>, SyntaxError>, AnalysisFailure> {
            let content = self.content_of(path, &entry)?;
            self.parses.fetch_add(1, Ordering::Relaxed);
            match parse_python(&key, &content) {
                Ok(parsed) => {
                    self.account(&entry, parsed.estimated_size());
                    Ok(Ok(Arc::new(parsed)))
                }
                Err(AnalysisFailure::Syntax(e)) => Ok(Err(e)),
                Err(other) => Err(other),
            }
        },
        )?;

        match outcome {
            Ok(tree) => Ok(tree.clone()),
            Err(e) => Err(AnalysisFailure::Syntax(e.clone())),
        }
    }

    fn clear(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            if entry.is_pinned() {
                return true;
            }
            self.release(entry.retire());
            false
        });
        self.clears.fetch_add(1, Ordering::Relaxed);
        debug!(dropped = before - self.entries.len(), "cache cleared");
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            bytes: self.total_bytes.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            parses: self.parses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
        }
    }

    fn enabled(&self) -> bool {
        true
    }
}

/// Pass-through implementation used when caching is disabled: every call
/// reads (and parses) the file again.
pub struct NoCache {
    root: PathBuf,
}

impl NoCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn rel_key(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

impl SourceCache for NoCache {
    fn get_content(&self, path: &Path) -> Result<Arc<str>, AnalysisFailure> {
        read_source(path, &self.rel_key(path))
    }

    fn get_tree(&self, path: &Path) -> Result<Arc<ParsedFile>, AnalysisFailure> {
        let key = self.rel_key(path);
        let content = read_source(path, &key)?;
        parse_python(&key, &content).map(Arc::new)
    }

    fn clear(&self) {}

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }

    fn enabled(&self) -> bool {
        false
    }
}

fn read_source(path: &Path, rel: &str) -> Result<Arc<str>, AnalysisFailure> {
    let bytes = fs::read(path).map_err(|e| AnalysisFailure::io(rel, e))?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };
    Ok(Arc::from(text))
}

/// Write `bytes` to a sibling temp file, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("replacing {} with {}", path.display(), tmp.display()))?;
    Ok(())
}
