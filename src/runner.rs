//! Run orchestration: resolve files, run the analyzers, aggregate a report.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::analyzers::{Analyzer, AnalyzerContext, AnalyzerKind, AnalyzerOutput};
use crate::config::RunConfig;
use crate::engine::{
    resolve, CacheStore, ErrorAccumulator, IncrementalTracker, MemoryGuard, NoCache, SourceCache,
};
use crate::report::Report;
use crate::suppress::{collect_suppressions, filter_suppressed};

/// Executes the configured analyzers against one project.
pub struct Runner {
    config: Arc<RunConfig>,
    parallel: bool,
}

impl Runner {
    /// Create a runner; parallelism defaults to the `parallel` setting.
    pub fn new(config: RunConfig) -> Self {
        let parallel = config.settings().parallel;
        Self {
            config: Arc::new(config),
            parallel,
        }
    }

    /// Run analyzers on the rayon pool (true) or one after another.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run every configured analyzer and build the report.
    ///
    /// Per-file failures never abort the run; they show up in
    /// `Report::analyzer_errors`. Failing to persist the cache index or the
    /// change manifest is reported as a warning.
    pub fn run(&self) -> anyhow::Result<Report> {
        let config = &self.config;
        let settings = config.settings();
        let root = config.project_path();
        let mut warnings = Vec::new();

        let store = settings.enable_caching.then(|| {
            let store = Arc::new(CacheStore::new(
                root,
                config.cache_dir(),
                settings.max_cache_size_bytes,
            ));
            store.load_from_disk();
            store
        });
        let cache: Arc<dyn SourceCache> = match &store {
            Some(store) => Arc::clone(store) as Arc<dyn SourceCache>,
            None => Arc::new(NoCache::new(root)),
        };

        let tracker = settings.incremental_enabled.then(|| {
            Arc::new(IncrementalTracker::load(root, config.cache_dir()))
        });
        if let Some(warning) = tracker.as_ref().and_then(|t| t.load_warning()) {
            warnings.push(warning.to_string());
        }

        let file_set = resolve(config);
        warnings.extend(file_set.warnings.iter().cloned());
        let files = match &tracker {
            Some(tracker) => {
                let changed = tracker.changed_files(&file_set.files);
                info!(
                    changed = changed.len(),
                    total = file_set.len(),
                    "incremental run narrowed file set"
                );
                changed
            }
            None => file_set.files.clone(),
        };

        let ctx = AnalyzerContext {
            config: config.clone(),
            errors: Arc::new(ErrorAccumulator::new()),
            cache: cache.clone(),
            tracker: tracker.clone(),
            memory: Arc::new(MemoryGuard::new(settings.memory_threshold_percent)),
        };
        let analyzers = build_analyzers(&settings.analyzers, &ctx);
        info!(
            analyzers = analyzers.len(),
            files = files.len(),
            parallel = self.parallel,
            "starting analysis"
        );

        let outputs: Vec<AnalyzerOutput> = if self.parallel {
            analyzers
                .par_iter()
                .map(|analyzer| run_one(analyzer.as_ref(), &files))
                .collect()
        } else {
            analyzers
                .iter()
                .map(|analyzer| run_one(analyzer.as_ref(), &files))
                .collect()
        };

        let mut findings = Vec::new();
        let mut summaries = BTreeMap::new();
        for output in outputs {
            warnings.extend(output.warnings);
            findings.extend(output.findings);
            summaries.insert(output.analyzer, output.summary);
        }

        let suppressions = collect_suppressions(cache.as_ref(), root, &file_set.files);
        let (active, suppressed) = filter_suppressed(findings, &suppressions);
        if !suppressed.is_empty() {
            debug!(count = suppressed.len(), "findings suppressed inline");
        }

        let errors = ctx.errors.snapshot();
        if let Some(tracker) = &tracker {
            // Files that failed stay "changed" so the next run retries them.
            let failed: HashSet<PathBuf> = errors.iter().map(|e| root.join(&e.file_path)).collect();
            for path in files.iter().filter(|p| !failed.contains(*p)) {
                tracker.mark_file_analyzed(path);
            }
            if let Err(e) = tracker.save_state() {
                warn!(error = %e, "could not save change manifest");
                warnings.push(format!("change manifest not saved: {:#}", e));
            }
        }
        if let Some(store) = &store {
            if let Err(e) = store.save_to_disk() {
                warn!(error = %e, "could not save cache index");
                warnings.push(format!("cache index not saved: {:#}", e));
            }
        }
        if ctx.memory.trips() > 0 {
            debug!(trips = ctx.memory.trips(), "memory guard cleared the cache");
        }

        let mut report = Report::build(active, errors);
        report.project_path = root.to_path_buf();
        report.files_scanned = files.len();
        report.analyzer_summaries = summaries;
        report.suppressed = suppressed;
        report.warnings = warnings;
        report.cache = cache.stats();

        info!(
            findings = report.total_findings(),
            errors = report.errors.len(),
            "analysis complete"
        );
        Ok(report)
    }
}

/// Instantiate the selected analyzers once each, in configuration order.
fn build_analyzers(kinds: &[AnalyzerKind], ctx: &AnalyzerContext) -> Vec<Box<dyn Analyzer>> {
    let mut seen = HashSet::new();
    kinds
        .iter()
        .filter(|kind| seen.insert(**kind))
        .map(|kind| kind.build(ctx.clone()))
        .collect()
}

fn run_one(analyzer: &dyn Analyzer, files: &[PathBuf]) -> AnalyzerOutput {
    debug!(analyzer = analyzer.name(), "analyzer started");
    let output = analyzer.analyze(files);
    debug!(
        analyzer = analyzer.name(),
        findings = output.findings.len(),
        scanned = output.scanned,
        "analyzer finished"
    );
    output
}
