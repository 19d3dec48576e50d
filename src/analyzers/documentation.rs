//! Documentation coverage, docstring quality, README completeness and
//! references from docs back into the tree.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use phf::phf_set;
use regex::Regex;

use crate::config::{AnalysisDepth, DocumentationSettings};
use crate::engine::{inventory, resolve, AnalysisError};
use crate::error::AnalysisFailure;
use crate::syntax::{extract_module_facts, Declaration, DeclarationKind};

use super::{Analyzer, AnalyzerContext, AnalyzerOutput, Category, Finding, Severity};

const NAME: &str = "documentation";

static GOOGLE_SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(Args|Arguments|Parameters|Returns|Yields|Raises):\s*$")
        .expect("google section pattern is valid")
});

static SPHINX_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*:(param|type|returns?|rtype|raises?)\b")
        .expect("sphinx field pattern is valid")
});

static RETURN_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(returns?|yields?|rtype)\b").expect("return pattern is valid"));

static MARKDOWN_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s{0,3}#{1,6}\s+(.+?)\s*#*\s*$").expect("heading pattern is valid"));

static RST_UNDERLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:={3,}|-{3,}|~{3,}|\^{3,}|\*{3,}|\+{3,}|#{3,})\s*$").expect("underline pattern is valid"));

static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*\]\(([^)\s]+)[^)]*\)").expect("link pattern is valid"));

static CODE_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`\n]+)`").expect("code span pattern is valid"));

static SYMBOL_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*\(\)$")
        .expect("symbol pattern is valid")
});

/// Extensions that make a code span look like a file path.
const PATH_EXTENSIONS: &[&str] = &[
    "py", "md", "rst", "txt", "toml", "cfg", "ini", "yaml", "yml", "json",
];

/// Callables that resolve without a definition in the project.
static BUILTINS: phf::Set<&'static str> = phf_set! {
    "print", "len", "open", "range", "str", "int", "float", "bool", "dict", "list",
    "set", "tuple", "isinstance", "super", "sorted", "map", "filter", "zip",
    "enumerate", "repr", "type", "iter", "next", "main",
};

/// README sections and the heading keywords that satisfy them.
const README_SECTIONS: &[(&str, &[&str])] = &[
    ("introduction", &["introduction", "overview", "about", "description"]),
    ("installation", &["install", "setup", "getting started", "requirements"]),
    ("usage", &["usage", "example", "quick start", "quickstart", "how to", "tutorial"]),
    ("API docs", &["api", "reference", "documentation", "docs"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocStyle {
    Google,
    Sphinx,
}

fn doc_style(doc: &str) -> Option<DocStyle> {
    if SPHINX_FIELD.is_match(doc) {
        Some(DocStyle::Sphinx)
    } else if GOOGLE_SECTION.is_match(doc) {
        Some(DocStyle::Google)
    } else {
        None
    }
}

fn mentions_word(doc: &str, word: &str) -> bool {
    doc.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|token| token == word)
}

/// Parameters the docstring never names, and whether a returned value is
/// left undescribed.
fn docstring_gaps<'d>(decl: &'d Declaration, doc: &str) -> (Vec<&'d str>, bool) {
    let missing: Vec<&str> = decl
        .explicit_parameters()
        .filter(|p| !mentions_word(doc, p))
        .collect();
    let returns_value = decl.body.as_ref().map(|b| b.returns_value).unwrap_or(false);
    let missing_return = returns_value && !RETURN_MENTION.is_match(doc);
    (missing, missing_return)
}

/// Declarations counted for coverage: public, non-dunder classes and callables.
fn is_documentable(decl: &Declaration) -> bool {
    decl.is_public() && !decl.is_dunder()
}

/// Headings (Markdown or reStructuredText) and the remaining prose lines.
fn readme_outline(text: &str) -> (Vec<String>, Vec<String>) {
    let lines: Vec<&str> = text.lines().collect();
    let mut headings = Vec::new();
    let mut prose = Vec::new();
    let mut idx = 0;
    while idx < lines.len() {
        let line = lines[idx];
        if let Some(caps) = MARKDOWN_HEADING.captures(line) {
            headings.push(caps[1].to_lowercase());
        } else if lines
            .get(idx + 1)
            .map(|next| RST_UNDERLINE.is_match(next) && !line.trim().is_empty())
            .unwrap_or(false)
        {
            headings.push(line.trim().to_lowercase());
            idx += 1;
        } else if !line.trim().is_empty() && !RST_UNDERLINE.is_match(line) {
            prose.push(line.to_lowercase());
        }
        idx += 1;
    }
    (headings, prose)
}

/// Sections of [`README_SECTIONS`] the README lacks.
fn missing_readme_sections(text: &str) -> Vec<&'static str> {
    let (headings, prose) = readme_outline(text);
    // the first heading is the title
    let section_headings = &headings[headings.len().min(1)..];
    let has_heading = |keywords: &[&str]| {
        section_headings
            .iter()
            .any(|h| keywords.iter().any(|k| h.contains(k)))
    };

    README_SECTIONS
        .iter()
        .filter(|(section, keywords)| {
            let present = match *section {
                "introduction" => !prose.is_empty() || has_heading(keywords),
                "installation" => {
                    has_heading(keywords) || prose.iter().any(|l| l.contains("pip install"))
                }
                _ => has_heading(keywords),
            };
            !present
        })
        .map(|(section, _)| *section)
        .collect()
}

fn find_readme(root: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(root)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_lowercase().starts_with("readme"))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

fn is_doc_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()).as_deref(),
        Some("md") | Some("rst")
    )
}

/// A reference found in a documentation file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reference {
    Path(String),
    Symbol(String),
}

fn looks_like_path(span: &str) -> bool {
    if span.contains(char::is_whitespace) || span.contains("://") {
        return false;
    }
    let has_ext = Path::new(span)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| PATH_EXTENSIONS.contains(&e))
        .unwrap_or(false);
    has_ext || (span.contains('/') && !span.starts_with('/'))
}

/// Path and symbol references on each line of a doc file.
fn extract_references(text: &str) -> Vec<(usize, Reference)> {
    let mut refs = Vec::new();
    let mut in_fence = false;
    for (idx, line) in text.lines().enumerate() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let line_no = idx + 1;
        for caps in MARKDOWN_LINK.captures_iter(line) {
            let target = &caps[1];
            if target.contains("://") || target.starts_with('#') || target.starts_with("mailto:") {
                continue;
            }
            let target = target.split(['#', '?']).next().unwrap_or(target);
            if !target.is_empty() {
                refs.push((line_no, Reference::Path(target.to_string())));
            }
        }
        for caps in CODE_SPAN.captures_iter(line) {
            let span = caps[1].trim();
            if SYMBOL_CALL.is_match(span) {
                refs.push((line_no, Reference::Symbol(span.trim_end_matches("()").to_string())));
            } else if looks_like_path(span) {
                refs.push((line_no, Reference::Path(span.to_string())));
            }
        }
    }
    refs
}

#[derive(Default)]
struct Coverage {
    items: usize,
    documented: usize,
}

impl Coverage {
    fn ratio(&self) -> f64 {
        if self.items == 0 {
            1.0
        } else {
            self.documented as f64 / self.items as f64
        }
    }
}

pub struct DocumentationAnalyzer {
    ctx: AnalyzerContext,
}

impl DocumentationAnalyzer {
    pub fn new(ctx: AnalyzerContext) -> Self {
        Self { ctx }
    }

    fn check_module(
        &self,
        rel: &Path,
        module_doc: Option<&str>,
        declarations: &[Declaration],
        settings: &DocumentationSettings,
        findings: &mut Vec<Finding>,
    ) -> Coverage {
        let mut coverage = Coverage {
            items: 1,
            documented: usize::from(module_doc.is_some()),
        };
        let mut styles: Vec<(DocStyle, usize)> = Vec::new();
        let mut documented_callables = 0;

        for decl in declarations.iter().filter(|d| is_documentable(d)) {
            coverage.items += 1;
            let label = match decl.kind {
                DeclarationKind::Class => "class",
                DeclarationKind::Method => "method",
                DeclarationKind::Function => "function",
            };
            let Some(doc) = decl.docstring.as_deref() else {
                findings.push(
                    Finding::new(
                        Category::MissingDocstring,
                        Severity::Low,
                        rel,
                        format!("public {} `{}` has no docstring", label, decl.qualified_name()),
                    )
                    .at_line(decl.span.start_line)
                    .recommend(format!("Add a docstring describing what the {} does", label)),
                );
                continue;
            };
            coverage.documented += 1;
            if !decl.kind.is_callable() {
                continue;
            }

            documented_callables += 1;
            if let Some(style) = doc_style(doc) {
                styles.push((style, decl.span.start_line));
            }
            let (missing, missing_return) = docstring_gaps(decl, doc);
            if !missing.is_empty() || missing_return {
                let mut gaps = Vec::new();
                if !missing.is_empty() {
                    gaps.push(format!(
                        "parameter(s) {}",
                        missing.iter().map(|p| format!("`{}`", p)).collect::<Vec<_>>().join(", ")
                    ));
                }
                if missing_return {
                    gaps.push("the return value".to_string());
                }
                findings.push(
                    Finding::new(
                        Category::IncompleteDocstring,
                        Severity::Low,
                        rel,
                        format!(
                            "docstring of {} `{}` does not describe {}",
                            label,
                            decl.qualified_name(),
                            gaps.join(" or ")
                        ),
                    )
                    .at_line(decl.span.start_line)
                    .recommend("Document every parameter and the returned value"),
                );
            }
        }

        if documented_callables >= settings.min_documented_for_style {
            let google = styles.iter().filter(|(s, _)| *s == DocStyle::Google).count();
            let sphinx = styles.iter().filter(|(s, _)| *s == DocStyle::Sphinx).count();
            if google > 0 && sphinx > 0 {
                let minority = if google >= sphinx { DocStyle::Sphinx } else { DocStyle::Google };
                let line = styles
                    .iter()
                    .find(|(s, _)| *s == minority)
                    .map(|(_, l)| *l)
                    .unwrap_or(1);
                findings.push(
                    Finding::new(
                        Category::DocstringStyleInconsistency,
                        Severity::Low,
                        rel,
                        format!(
                            "module mixes docstring styles: {} Google-style, {} Sphinx-style",
                            google, sphinx
                        ),
                    )
                    .at_line(line)
                    .recommend("Pick one docstring convention for the module"),
                );
            }
        }

        let has_declarations = declarations.iter().any(is_documentable);
        if has_declarations && coverage.ratio() < settings.coverage_threshold {
            findings.push(
                Finding::new(
                    Category::DocstringCoverage,
                    Severity::Low,
                    rel,
                    format!(
                        "docstring coverage {:.0}% ({} of {} items) is below {:.0}%",
                        coverage.ratio() * 100.0,
                        coverage.documented,
                        coverage.items,
                        settings.coverage_threshold * 100.0
                    ),
                )
                .recommend("Document the module and its public classes and functions")
                .with_metric(coverage.ratio()),
            );
        }

        coverage
    }

    fn check_readme(&self, settings: &DocumentationSettings, output: &mut AnalyzerOutput) -> Option<PathBuf> {
        let root = self.ctx.config.project_path();
        let Some(path) = find_readme(root) else {
            output.findings.push(
                Finding::new(
                    Category::ReadmeCompleteness,
                    Severity::High,
                    "README.md",
                    "project has no README",
                )
                .recommend("Add a README covering introduction, installation, usage and API docs")
                .with_metric(0.0),
            );
            output.set("readme_found", false);
            return None;
        };
        let rel = self.ctx.relative(&path);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                let failure = AnalysisFailure::io(&rel, e);
                self.ctx
                    .errors
                    .record(AnalysisError::from_failure(NAME, &rel, &failure));
                return None;
            }
        };
        output.set("readme_found", true);

        let missing = missing_readme_sections(&text);
        let score = (README_SECTIONS.len() - missing.len()) as f64 / README_SECTIONS.len() as f64;
        output.set("readme_score", score);
        if !missing.is_empty() {
            output.findings.push(
                Finding::new(
                    Category::ReadmeCompleteness,
                    Severity::Medium,
                    &rel,
                    format!("README is missing sections: {}", missing.join(", ")),
                )
                .recommend("Add the missing sections to the README")
                .with_metric(score),
            );
        }

        let lines = text.lines().filter(|l| !l.trim().is_empty()).count();
        if lines < settings.readme_min_lines {
            output.findings.push(
                Finding::new(
                    Category::ReadmeLength,
                    Severity::Low,
                    &rel,
                    format!(
                        "README has only {} non-blank lines (expected at least {})",
                        lines, settings.readme_min_lines
                    ),
                )
                .recommend("Expand the README with setup and usage details")
                .with_metric(lines as f64),
            );
        }
        Some(path)
    }

    /// Check path and symbol references in the README and other doc files.
    /// Incremental runs only see changed files; symbols defined in the rest
    /// of the project still count as valid reference targets.
    fn add_unchanged_symbols(&self, analyzed: &[PathBuf], symbols: &mut HashSet<String>) {
        let analyzed: HashSet<&PathBuf> = analyzed.iter().collect();
        for path in resolve(&self.ctx.config).files {
            if analyzed.contains(&path) {
                continue;
            }
            let Ok(parsed) = self.ctx.cache.get_tree(&path) else {
                continue;
            };
            if let Ok(facts) = extract_module_facts(&parsed) {
                symbols.extend(facts.declarations.into_iter().map(|d| d.name));
            }
        }
    }

    fn check_references(
        &self,
        readme: Option<PathBuf>,
        symbols: &HashSet<String>,
        output: &mut AnalyzerOutput,
    ) -> (usize, usize) {
        let root = self.ctx.config.project_path();
        let mut docs: Vec<PathBuf> = inventory(&self.ctx.config)
            .into_iter()
            .filter(|p| is_doc_file(p))
            .collect();
        if let Some(readme) = readme {
            if !docs.contains(&readme) {
                docs.insert(0, readme);
            }
        }

        let mut checked = 0;
        let mut invalid = 0;
        for doc in docs {
            let rel = self.ctx.relative(&doc);
            let text = match fs::read_to_string(&doc) {
                Ok(text) => text,
                Err(e) => {
                    let failure = AnalysisFailure::io(&rel, e);
                    self.ctx
                        .errors
                        .record(AnalysisError::from_failure(NAME, &rel, &failure));
                    continue;
                }
            };
            let doc_dir = doc.parent().unwrap_or(root);

            for (line, reference) in extract_references(&text) {
                checked += 1;
                let finding = match &reference {
                    Reference::Path(target) => {
                        let target = target.trim_start_matches("./");
                        if doc_dir.join(target).exists() || root.join(target).exists() {
                            continue;
                        }
                        Finding::new(
                            Category::InvalidReference,
                            Severity::Medium,
                            &rel,
                            format!("reference to missing path `{}`", target),
                        )
                        .recommend("Fix the path or remove the stale reference")
                    }
                    Reference::Symbol(symbol) => {
                        let last = symbol.rsplit('.').next().unwrap_or(symbol);
                        if symbols.contains(last) || BUILTINS.contains(last) {
                            continue;
                        }
                        Finding::new(
                            Category::InvalidReference,
                            Severity::Low,
                            &rel,
                            format!("reference to unknown symbol `{}()`", symbol),
                        )
                        .recommend("Update the docs to match the current API")
                    }
                };
                invalid += 1;
                output.findings.push(finding.at_line(line));
            }
        }
        (checked, invalid)
    }
}

impl Analyzer for DocumentationAnalyzer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn analyze(&self, files: &[PathBuf]) -> AnalyzerOutput {
        let mut output = AnalyzerOutput::new(NAME);
        let settings = &self.ctx.config.settings().documentation;
        let mut project = Coverage::default();
        let mut symbols: HashSet<String> = HashSet::new();

        self.ctx.for_each_file(NAME, files, &mut output, |path, findings| {
            let parsed = self.ctx.cache.get_tree(path)?;
            let rel = self.ctx.relative(path);
            let facts = extract_module_facts(&parsed)?;

            let coverage = self.check_module(
                &rel,
                facts.module_docstring.as_deref(),
                &facts.declarations,
                settings,
                findings,
            );
            project.items += coverage.items;
            project.documented += coverage.documented;
            symbols.extend(facts.declarations.iter().map(|d| d.name.clone()));
            Ok(())
        });

        if project.items > 0 && project.ratio() < settings.coverage_threshold {
            output.findings.push(
                Finding::new(
                    Category::DocstringCoverage,
                    Severity::Medium,
                    ".",
                    format!(
                        "project docstring coverage {:.0}% ({} of {} items) is below {:.0}%",
                        project.ratio() * 100.0,
                        project.documented,
                        project.items,
                        settings.coverage_threshold * 100.0
                    ),
                )
                .recommend("Prioritize docstrings for public modules and APIs")
                .with_metric(project.ratio()),
            );
        }

        let readme = self.check_readme(settings, &mut output);
        let (checked, invalid) = if self.ctx.config.depth() == AnalysisDepth::Quick {
            (0, 0)
        } else {
            if self.ctx.tracker.is_some() {
                self.add_unchanged_symbols(files, &mut symbols);
            }
            self.check_references(readme, &symbols, &mut output)
        };

        output.set("total_items", project.items);
        output.set("documented_items", project.documented);
        output.set("coverage", (project.ratio() * 100.0).round() / 100.0);
        output.set("references_checked", checked);
        output.set("invalid_references", invalid);

        self.ctx.finish(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::{of_category, project};
    use crate::config::Settings;

    const DOCUMENTED: &str = r#""""Helpers for paths."""

def join(base, name):
    """Join base and name.

    Args:
        base: directory
        name: file name

    Returns:
        The joined path.
    """
    return base + "/" + name
"#;

    const FULL_README: &str = "# Tool\n\nA tool that does things.\n\n## Installation\n\npip install tool\n\n## Usage\n\nRun `join()` from `pkg/paths.py`.\n\n## API Reference\n\nSee docs.\n";

    #[test]
    fn test_short_readme_missing_sections_and_length() {
        let (_temp, ctx, files) = project(
            &[("README.md", "# Project\n\nJust a paragraph about it.\n"), ("pkg/paths.py", DOCUMENTED)],
            Settings::default(),
        );
        let output = DocumentationAnalyzer::new(ctx).analyze(&files);

        let completeness = of_category(&output, Category::ReadmeCompleteness);
        assert_eq!(completeness.len(), 1);
        assert!(completeness[0].description.contains("installation"));
        assert!(completeness[0].description.contains("usage"));
        assert!(!completeness[0].description.contains("introduction"));
        assert_eq!(of_category(&output, Category::ReadmeLength).len(), 1);
    }

    #[test]
    fn test_missing_readme_is_high() {
        let (_temp, ctx, files) = project(&[("pkg/paths.py", DOCUMENTED)], Settings::default());
        let output = DocumentationAnalyzer::new(ctx).analyze(&files);
        let found = of_category(&output, Category::ReadmeCompleteness);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::High);
        assert_eq!(output.summary["readme_found"], false);
    }

    #[test]
    fn test_well_documented_module_is_clean() {
        let mut settings = Settings::default();
        settings.documentation.readme_min_lines = 5;
        let (_temp, ctx, files) = project(
            &[("README.md", FULL_README), ("pkg/paths.py", DOCUMENTED)],
            settings,
        );
        let output = DocumentationAnalyzer::new(ctx).analyze(&files);
        assert!(output.findings.is_empty(), "{:?}", output.findings);
        assert_eq!(output.summary["coverage"], 1.0);
        assert_eq!(output.summary["references_checked"], 2);
    }

    #[test]
    fn test_missing_and_incomplete_docstrings() {
        let source = r#"
def public(a, b):
    return a

def documented(a, b):
    """Uses a only."""
    return a

def _private():
    pass

class Thing:
    pass
"#;
        let (_temp, ctx, files) = project(&[("m.py", source)], Settings::default());
        let output = DocumentationAnalyzer::new(ctx).analyze(&files);

        let missing = of_category(&output, Category::MissingDocstring);
        assert_eq!(missing.len(), 2);
        let incomplete = of_category(&output, Category::IncompleteDocstring);
        assert_eq!(incomplete.len(), 1);
        assert!(incomplete[0].description.contains("`b`"));
        assert!(incomplete[0].description.contains("return value"));

        // module + 3 public items, 1 documented
        let coverage = of_category(&output, Category::DocstringCoverage);
        assert_eq!(coverage.len(), 2);
        assert_eq!(output.summary["total_items"], 4);
        assert_eq!(output.summary["documented_items"], 1);
    }

    #[test]
    fn test_style_mixing_needs_enough_documented_functions() {
        let source = r#""""Mixed."""

def a(x):
    """Do a.

    Args:
        x: value
    """

def b(x):
    """Do b.

    :param x: value
    """

def c(x):
    """Do c with x."""
"#;
        let (_temp, ctx, files) = project(&[("m.py", source)], Settings::default());
        let output = DocumentationAnalyzer::new(ctx).analyze(&files);
        assert_eq!(of_category(&output, Category::DocstringStyleInconsistency).len(), 1);

        let mut settings = Settings::default();
        settings.documentation.min_documented_for_style = 4;
        let (_temp, ctx, files) = project(&[("m.py", source)], settings);
        let output = DocumentationAnalyzer::new(ctx).analyze(&files);
        assert!(of_category(&output, Category::DocstringStyleInconsistency).is_empty());
    }

    #[test]
    fn test_invalid_references_and_quick_depth() {
        let readme = "# Tool\n\nSee [guide](docs/guide.md) and `pkg/gone.py`.\nCall `vanished()` or `join()`.\n";
        let files_in = [("README.md", readme), ("pkg/paths.py", DOCUMENTED)];
        let (_temp, ctx, files) = project(&files_in, Settings::default());
        let output = DocumentationAnalyzer::new(ctx).analyze(&files);
        let invalid = of_category(&output, Category::InvalidReference);
        assert_eq!(invalid.len(), 3);
        assert_eq!(invalid.iter().filter(|f| f.severity == Severity::Medium).count(), 2);
        assert!(invalid.iter().any(|f| f.description.contains("vanished")));

        let quick = Settings {
            analysis_depth: AnalysisDepth::Quick,
            ..Settings::default()
        };
        let (_temp, ctx, files) = project(&files_in, quick);
        let output = DocumentationAnalyzer::new(ctx).analyze(&files);
        assert!(of_category(&output, Category::InvalidReference).is_empty());
    }

    #[test]
    fn test_readme_outline_handles_rst() {
        let text = "Tool\n====\n\nIntro text.\n\nInstallation\n------------\n\nUsage\n-----\n";
        let missing = missing_readme_sections(text);
        assert_eq!(missing, vec!["API docs"]);
    }
}
