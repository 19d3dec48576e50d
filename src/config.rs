//! Run configuration.
//!
//! [`Settings`] is the plain, serde-loadable description of a run (typically a
//! `codeaudit.yaml` next to the project). [`RunConfig`] is the validated,
//! immutable form shared by every analyzer for one run.

use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::analyzers::{AnalyzerKind, Severity};
use crate::error::ConfigError;

/// Name of the cache directory created under the project when none is configured.
pub const DEFAULT_CACHE_DIR: &str = ".codeaudit_cache";

/// How much work the analyzers do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisDepth {
    Quick,
    #[default]
    Standard,
    Full,
}

impl std::str::FromStr for AnalysisDepth {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quick" => Ok(AnalysisDepth::Quick),
            "standard" => Ok(AnalysisDepth::Standard),
            "full" => Ok(AnalysisDepth::Full),
            _ => Err(ConfigError::InvalidDepth(s.to_string())),
        }
    }
}

/// Duplicate analyzer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateSettings {
    /// Blocks with fewer statements (counted recursively) are ignored.
    pub min_block_statements: usize,
    /// Token-overlap ratio at or above which two blocks are "similar".
    pub similarity_threshold: f64,
    /// Also extract significant if/for/while/try/with blocks.
    pub include_control_blocks: bool,
}

impl Default for DuplicateSettings {
    fn default() -> Self {
        Self {
            min_block_statements: 3,
            similarity_threshold: 0.8,
            include_control_blocks: true,
        }
    }
}

/// Quality analyzer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    pub complexity_threshold: u32,
    pub max_line_length: usize,
    pub max_function_lines: usize,
    pub max_parameters: usize,
    /// Probe PATH for flake8/ruff and run it in `full` depth.
    pub enable_external_linter: bool,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            complexity_threshold: 10,
            max_line_length: 120,
            max_function_lines: 50,
            max_parameters: 6,
            enable_external_linter: false,
        }
    }
}

/// Documentation analyzer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentationSettings {
    /// Minimum documented fraction (0.0 - 1.0) per module and for the project.
    pub coverage_threshold: f64,
    /// Documented functions a module needs before style mixing is reported.
    pub min_documented_for_style: usize,
    /// READMEs with fewer non-blank lines are reported as too short.
    pub readme_min_lines: usize,
}

impl Default for DocumentationSettings {
    fn default() -> Self {
        Self {
            coverage_threshold: 0.5,
            min_documented_for_style: 3,
            readme_min_lines: 10,
        }
    }
}

/// File analyzer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    /// Temporary-looking files older than this are reported as outdated.
    pub outdated_days: u64,
    /// Bytes sampled from the head of a file when checking for binary content.
    pub binary_sample_bytes: usize,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            outdated_days: 30,
            binary_sample_bytes: 8192,
        }
    }
}

/// User-facing settings. Every field has a default; unknown keys are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub severity_threshold: Severity,
    pub max_file_size_bytes: u64,
    pub enable_caching: bool,
    /// Defaults to `<project>/.codeaudit_cache`.
    pub cache_dir: Option<PathBuf>,
    pub max_cache_size_bytes: u64,
    pub incremental_enabled: bool,
    pub memory_threshold_percent: f64,
    pub analysis_depth: AnalysisDepth,
    /// Truncate the resolved file set to the first N files (0 or absent: no limit).
    pub max_files_per_analyzer: Option<usize>,
    /// Run analyzers on the rayon pool instead of one after another.
    pub parallel: bool,
    /// Analyzers to run, by name.
    pub analyzers: Vec<AnalyzerKind>,
    pub duplicates: DuplicateSettings,
    pub quality: QualitySettings,
    pub documentation: DocumentationSettings,
    pub files: FileSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            include_patterns: vec!["**/*.py".to_string()],
            exclude_patterns: vec![
                "**/__pycache__/**".to_string(),
                "**/.venv/**".to_string(),
                "**/venv/**".to_string(),
                "**/node_modules/**".to_string(),
                "**/.tox/**".to_string(),
                "**/build/**".to_string(),
                "**/dist/**".to_string(),
            ],
            severity_threshold: Severity::Low,
            max_file_size_bytes: 1024 * 1024,
            enable_caching: true,
            cache_dir: None,
            max_cache_size_bytes: 256 * 1024 * 1024,
            incremental_enabled: false,
            memory_threshold_percent: 80.0,
            analysis_depth: AnalysisDepth::Standard,
            max_files_per_analyzer: None,
            parallel: true,
            analyzers: AnalyzerKind::ALL.to_vec(),
            duplicates: DuplicateSettings::default(),
            quality: QualitySettings::default(),
            documentation: DocumentationSettings::default(),
            files: FileSettings::default(),
        }
    }
}

impl Settings {
    /// Parse settings from a YAML file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Validated, immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    project_path: PathBuf,
    cache_dir: PathBuf,
    settings: Settings,
    include: GlobSet,
    exclude: GlobSet,
}

impl RunConfig {
    /// Validate `settings` against `project_path`.
    pub fn new<P: AsRef<Path>>(project_path: P, settings: Settings) -> Result<Self, ConfigError> {
        let raw = project_path.as_ref();
        let project_path = raw
            .canonicalize()
            .map_err(|_| ConfigError::MissingProjectPath(raw.to_path_buf()))?;
        if !project_path.is_dir() {
            return Err(ConfigError::NotADirectory(project_path));
        }

        if settings.include_patterns.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "include_patterns",
                reason: "at least one include pattern is required".to_string(),
            });
        }
        if settings.max_file_size_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_file_size_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }
        let pct = settings.memory_threshold_percent;
        if !(pct > 0.0 && pct <= 100.0) {
            return Err(ConfigError::InvalidValue {
                field: "memory_threshold_percent",
                reason: format!("{} is outside (0, 100]", pct),
            });
        }
        let sim = settings.duplicates.similarity_threshold;
        if !(0.0..=1.0).contains(&sim) {
            return Err(ConfigError::InvalidValue {
                field: "duplicates.similarity_threshold",
                reason: format!("{} is outside [0, 1]", sim),
            });
        }
        let cov = settings.documentation.coverage_threshold;
        if !(0.0..=1.0).contains(&cov) {
            return Err(ConfigError::InvalidValue {
                field: "documentation.coverage_threshold",
                reason: format!("{} is outside [0, 1]", cov),
            });
        }

        let include = build_globset(&settings.include_patterns)?;
        let exclude = build_globset(&settings.exclude_patterns)?;

        let cache_dir = match &settings.cache_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => project_path.join(dir),
            None => project_path.join(DEFAULT_CACHE_DIR),
        };

        Ok(Self {
            project_path,
            cache_dir,
            settings,
            include,
            exclude,
        })
    }

    /// Configuration with all defaults.
    pub fn with_defaults<P: AsRef<Path>>(project_path: P) -> Result<Self, ConfigError> {
        Self::new(project_path, Settings::default())
    }

    /// Load settings from a YAML file and validate them.
    pub fn from_file<P: AsRef<Path>, C: AsRef<Path>>(
        project_path: P,
        config_path: C,
    ) -> Result<Self, ConfigError> {
        let settings = Settings::parse_file(config_path)?;
        Self::new(project_path, settings)
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn severity_threshold(&self) -> Severity {
        self.settings.severity_threshold
    }

    pub fn depth(&self) -> AnalysisDepth {
        self.settings.analysis_depth
    }

    /// Path relative to the project root (unchanged if outside it).
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.project_path).unwrap_or(path)
    }

    /// Check a project-relative path against the include patterns.
    pub fn is_included(&self, rel_path: &Path) -> bool {
        self.include.is_match(rel_path)
    }

    /// Check a project-relative path against the exclude patterns.
    pub fn is_excluded(&self, rel_path: &Path) -> bool {
        self.exclude.is_match(rel_path)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| ConfigError::InvalidPattern {
        pattern: patterns.join(", "),
        source,
    })
}
