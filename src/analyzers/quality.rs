//! Complexity and style checks.
//!
//! Cyclomatic complexity comes from the control-flow facts extracted per
//! function. Style checks work on the raw lines, except multiple statements
//! per line which needs the tree so semicolons inside strings are ignored.
//! An external linter (ruff or flake8) is located once when the analyzer is
//! built and only runs at `full` depth.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::{AnalysisDepth, QualitySettings};
use crate::syntax::{extract_module_facts, walk, SyntaxKind, SyntaxNode, Visitor, Walk};

use super::{Analyzer, AnalyzerContext, AnalyzerOutput, Category, Finding, Severity};

const NAME: &str = "quality";

/// Linters tried in order of preference.
const LINTERS: &[&str] = &["ruff", "flake8"];

/// `path:line:col: CODE message`, the shape both linters print.
static LINT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<path>.+?):(?P<line>\d+):(?P<col>\d+): (?P<code>[A-Z]+[0-9]+) (?P<message>.*)$")
        .expect("lint output pattern is valid")
});

/// One message reported by the external linter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintMessage {
    pub line: usize,
    pub column: usize,
    pub code: String,
    pub message: String,
}

/// External linter capability, resolved once per analyzer.
#[derive(Debug, Clone, Default)]
pub struct LinterProbe {
    program: Option<(&'static str, PathBuf)>,
}

impl LinterProbe {
    /// Search `PATH` for a known linter when `enabled`.
    pub fn detect(enabled: bool) -> Self {
        if !enabled {
            return Self::default();
        }
        let found = env::var_os("PATH").and_then(|paths| {
            LINTERS.iter().find_map(|name| {
                env::split_paths(&paths)
                    .map(|dir| dir.join(name))
                    .find(|candidate| candidate.is_file())
                    .map(|path| (*name, path))
            })
        });
        match &found {
            Some((name, path)) => debug!(linter = name, path = %path.display(), "external linter found"),
            None => debug!("no external linter on PATH"),
        }
        Self { program: found }
    }

    pub fn available(&self) -> bool {
        self.program.is_some()
    }

    pub fn name(&self) -> Option<&'static str> {
        self.program.as_ref().map(|(name, _)| *name)
    }

    /// Lint one file. Launch failures are logged and yield no messages.
    fn run(&self, path: &Path) -> Vec<LintMessage> {
        let Some((name, program)) = &self.program else {
            return Vec::new();
        };
        let mut command = Command::new(program);
        if *name == "ruff" {
            command.args(["check", "--output-format=concise", "--no-cache", "--quiet"]);
        }
        match command.arg(path).output() {
            Ok(output) => parse_lint_output(&String::from_utf8_lossy(&output.stdout)),
            Err(e) => {
                warn!(linter = name, path = %path.display(), error = %e, "external linter failed to start");
                Vec::new()
            }
        }
    }
}

/// Parse linter output, skipping lines that do not look like messages.
pub fn parse_lint_output(text: &str) -> Vec<LintMessage> {
    text.lines()
        .filter_map(|line| {
            let caps = LINT_LINE.captures(line.trim_end())?;
            Some(LintMessage {
                line: caps["line"].parse().ok()?,
                column: caps["col"].parse().ok()?,
                code: caps["code"].to_string(),
                message: caps["message"].to_string(),
            })
        })
        .collect()
}

fn lint_severity(code: &str) -> Severity {
    // E9xx are syntax/IO errors, F are pyflakes logic errors
    if code.starts_with("E9") || code.starts_with('F') {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Consecutive statements of one block that share a line.
#[derive(Default)]
struct SharedLineFinder {
    lines: Vec<usize>,
}

impl SharedLineFinder {
    fn check_block(&mut self, block: SyntaxNode<'_>) {
        let statements = block.statements();
        for pair in statements.windows(2) {
            if pair[0].end_line() == pair[1].start_line() {
                self.lines.push(pair[1].start_line());
            }
        }
    }
}

impl<'t> Visitor<'t> for SharedLineFinder {
    fn visit_module(&mut self, node: SyntaxNode<'t>) -> Walk {
        self.check_block(node);
        Walk::Children
    }

    fn visit_other(&mut self, node: SyntaxNode<'t>) -> Walk {
        if node.kind() == SyntaxKind::Block {
            self.check_block(node);
        }
        Walk::Children
    }
}

/// One finding per style category per file: the count and the first line.
fn style_findings(source: &str, root: SyntaxNode<'_>, rel: &Path, settings: &QualitySettings) -> Vec<Finding> {
    let mut long_lines = Vec::new();
    let mut trailing = Vec::new();
    let mut mixed = Vec::new();
    let mut first_tab_indent = None;
    let mut first_space_indent = None;

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end_matches('\r');
        if line.chars().count() > settings.max_line_length {
            long_lines.push(line_no);
        }
        if line.ends_with(' ') || line.ends_with('\t') {
            trailing.push(line_no);
        }
        let indent: &str = &line[..line.len() - line.trim_start_matches([' ', '\t']).len()];
        if line.trim().is_empty() || indent.is_empty() {
            continue;
        }
        let tabs = indent.contains('\t');
        let spaces = indent.contains(' ');
        if tabs && spaces {
            mixed.push(line_no);
        } else if tabs {
            first_tab_indent.get_or_insert(line_no);
        } else {
            first_space_indent.get_or_insert(line_no);
        }
    }
    if let (Some(tab), Some(space)) = (first_tab_indent, first_space_indent) {
        mixed.push(tab.max(space));
        mixed.sort_unstable();
    }

    let mut shared = SharedLineFinder::default();
    walk(&mut shared, root);
    shared.lines.sort_unstable();
    shared.lines.dedup();

    let checks = [
        (
            Category::LineTooLong,
            long_lines,
            format!("longer than {} characters", settings.max_line_length),
            "Wrap long lines or extract sub-expressions into named variables",
        ),
        (
            Category::TrailingWhitespace,
            trailing,
            "with trailing whitespace".to_string(),
            "Strip trailing whitespace (most editors can do this on save)",
        ),
        (
            Category::MixedIndentation,
            mixed,
            "indented with a mix of tabs and spaces".to_string(),
            "Indent with spaces only",
        ),
        (
            Category::MultipleStatements,
            shared.lines,
            "holding more than one statement".to_string(),
            "Put each statement on its own line",
        ),
    ];

    checks
        .into_iter()
        .filter(|(_, lines, _, _)| !lines.is_empty())
        .map(|(category, lines, what, recommendation)| {
            Finding::new(
                category,
                Severity::Low,
                rel,
                format!("{} line(s) {} (first at line {})", lines.len(), what, lines[0]),
            )
            .at_line(lines[0])
            .recommend(recommendation)
            .with_metric(lines.len() as f64)
        })
        .collect()
}

pub struct QualityAnalyzer {
    ctx: AnalyzerContext,
    linter: LinterProbe,
}

impl QualityAnalyzer {
    pub fn new(ctx: AnalyzerContext) -> Self {
        let linter = LinterProbe::detect(ctx.config.settings().quality.enable_external_linter);
        Self { ctx, linter }
    }

    /// Use an already-resolved linter capability.
    pub fn with_linter(ctx: AnalyzerContext, linter: LinterProbe) -> Self {
        Self { ctx, linter }
    }
}

impl Analyzer for QualityAnalyzer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn analyze(&self, files: &[PathBuf]) -> AnalyzerOutput {
        let mut output = AnalyzerOutput::new(NAME);
        let settings = &self.ctx.config.settings().quality;
        let run_linter = self.linter.available() && self.ctx.config.depth() == AnalysisDepth::Full;
        let mut complexities: Vec<u32> = Vec::new();

        self.ctx.for_each_file(NAME, files, &mut output, |path, findings| {
            let parsed = self.ctx.cache.get_tree(path)?;
            let rel = self.ctx.relative(path);
            let facts = extract_module_facts(&parsed)?;

            for decl in facts.callables() {
                let Some(body) = &decl.body else { continue };
                let name = decl.qualified_name();
                let line = decl.span.start_line;

                let score = body.control_flow.cyclomatic_complexity();
                complexities.push(score);
                if score > settings.complexity_threshold {
                    let severity = if score > settings.complexity_threshold.saturating_mul(2) {
                        Severity::High
                    } else {
                        Severity::Medium
                    };
                    findings.push(
                        Finding::new(
                            Category::CodeQuality,
                            severity,
                            &rel,
                            format!(
                                "{} `{}` has cyclomatic complexity {} (threshold {})",
                                decl.kind, name, score, settings.complexity_threshold
                            ),
                        )
                        .at_line(line)
                        .recommend("Split the function into smaller helpers or flatten nested branches")
                        .with_metric(score as f64),
                    );
                }

                let length = decl.span.line_count();
                if length > settings.max_function_lines {
                    findings.push(
                        Finding::new(
                            Category::LongFunction,
                            Severity::Low,
                            &rel,
                            format!(
                                "{} `{}` spans {} lines (limit {})",
                                decl.kind, name, length, settings.max_function_lines
                            ),
                        )
                        .at_line(line)
                        .recommend("Extract cohesive steps into separate functions")
                        .with_metric(length as f64),
                    );
                }

                let params = decl.explicit_parameters().count();
                if params > settings.max_parameters {
                    findings.push(
                        Finding::new(
                            Category::TooManyParameters,
                            Severity::Low,
                            &rel,
                            format!(
                                "{} `{}` takes {} parameters (limit {})",
                                decl.kind, name, params, settings.max_parameters
                            ),
                        )
                        .at_line(line)
                        .recommend("Group related parameters into a dataclass or config object")
                        .with_metric(params as f64),
                    );
                }
            }

            findings.extend(style_findings(parsed.source_str(), parsed.root(), &rel, settings));

            if run_linter {
                findings.extend(self.linter.run(path).into_iter().map(|msg| {
                    Finding::new(
                        Category::LintViolation,
                        lint_severity(&msg.code),
                        &rel,
                        format!("{} {}", msg.code, msg.message),
                    )
                    .at_line(msg.line)
                    .recommend(format!("See the linter documentation for {}", msg.code))
                }));
            }
            Ok(())
        });

        let functions = complexities.len();
        let max = complexities.iter().copied().max().unwrap_or(0);
        let average = if functions == 0 {
            0.0
        } else {
            complexities.iter().map(|&c| c as f64).sum::<f64>() / functions as f64
        };
        let high = output
            .findings
            .iter()
            .filter(|f| f.category == Category::CodeQuality)
            .count();
        let style = output
            .findings
            .iter()
            .filter(|f| {
                matches!(
                    f.category,
                    Category::LineTooLong
                        | Category::TrailingWhitespace
                        | Category::MixedIndentation
                        | Category::MultipleStatements
                )
            })
            .count();

        output.set("functions_analyzed", functions);
        output.set("average_complexity", (average * 100.0).round() / 100.0);
        output.set("max_complexity", max);
        output.set("high_complexity_functions", high);
        output.set("style_issues", style);
        output.set("linter_available", self.linter.available());
        output.set("linter", self.linter.name());

        self.ctx.finish(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::{of_category, project};
    use crate::config::Settings;

    fn with_threshold(threshold: u32) -> Settings {
        let mut settings = Settings::default();
        settings.quality.complexity_threshold = threshold;
        settings
    }

    #[test]
    fn test_complexity_orders_nested_over_branch_over_straight() {
        let source = r#"
def straight(x):
    y = x + 1
    return y

def branch(x):
    if x:
        return 1
    return 0

def nested(items):
    for item in items:
        if item:
            for part in item:
                if part and part > 1:
                    return part
    return None
"#;
        let (_temp, ctx, files) = project(&[("m.py", source)], with_threshold(0));
        let output = QualityAnalyzer::new(ctx).analyze(&files);
        let score = |name: &str| {
            of_category(&output, Category::CodeQuality)
                .into_iter()
                .find(|f| f.description.contains(&format!("`{}`", name)))
                .and_then(|f| f.metric)
                .unwrap()
        };
        assert_eq!(score("straight"), 1.0);
        assert_eq!(score("branch"), 2.0);
        assert!(score("nested") > score("branch"));
        assert_eq!(output.summary["max_complexity"], 6);
    }

    #[test]
    fn test_four_nested_decisions_reported_with_score() {
        let source = "def walk(rows):\n    for row in rows:\n        if row:\n            for cell in row:\n                if cell:\n                    print(cell)\n";
        let (_temp, ctx, files) = project(&[("m.py", source)], with_threshold(4));
        let output = QualityAnalyzer::new(ctx).analyze(&files);
        let found = of_category(&output, Category::CodeQuality);
        assert_eq!(found.len(), 1);
        assert!(found[0].metric.unwrap() >= 5.0);
        assert!(found[0].description.contains("complexity 5"));
    }

    #[test]
    fn test_style_checks_are_separate_categories() {
        let source = format!(
            "x = 1 \nif x:\n\ty = 2\n    \nz = {}\na = 1; b = 2\ns = \"a; b\"\n",
            "9".repeat(130)
        );
        let (_temp, ctx, files) = project(&[("m.py", &source)], Settings::default());
        let output = QualityAnalyzer::new(ctx).analyze(&files);

        assert_eq!(of_category(&output, Category::TrailingWhitespace)[0].line_number, Some(1));
        assert_eq!(of_category(&output, Category::LineTooLong)[0].line_number, Some(5));
        let multiple = of_category(&output, Category::MultipleStatements);
        assert_eq!(multiple.len(), 1);
        assert_eq!(multiple[0].line_number, Some(6));
        assert_eq!(multiple[0].metric, Some(1.0));
        assert!(of_category(&output, Category::MixedIndentation).is_empty());
    }

    #[test]
    fn test_mixed_indentation_across_lines() {
        let source = "def f():\n\treturn 1\n\ndef g():\n    return 2\n";
        let (_temp, ctx, files) = project(&[("m.py", source)], Settings::default());
        let output = QualityAnalyzer::new(ctx).analyze(&files);
        let mixed = of_category(&output, Category::MixedIndentation);
        assert_eq!(mixed.len(), 1);
        assert_eq!(mixed[0].line_number, Some(5));
    }

    #[test]
    fn test_parameters_and_length() {
        let mut settings = Settings::default();
        settings.quality.max_parameters = 2;
        settings.quality.max_function_lines = 3;
        let source = "class K:\n    def m(self, a, b):\n        return a\n\ndef f(a, b, c):\n    x = a\n    y = b\n    z = c\n    return x\n";
        let (_temp, ctx, files) = project(&[("m.py", source)], settings);
        let output = QualityAnalyzer::new(ctx).analyze(&files);

        let params = of_category(&output, Category::TooManyParameters);
        assert_eq!(params.len(), 1);
        assert!(params[0].description.contains("`f`"));
        let long = of_category(&output, Category::LongFunction);
        assert_eq!(long.len(), 1);
        assert_eq!(long[0].metric, Some(5.0));
    }

    #[test]
    fn test_missing_linter_is_a_capability_flag() {
        let settings = Settings {
            analysis_depth: AnalysisDepth::Full,
            ..Settings::default()
        };
        let (_temp, ctx, files) = project(&[("m.py", "x = 1\n")], settings);
        let output = QualityAnalyzer::with_linter(ctx, LinterProbe::default()).analyze(&files);
        assert_eq!(output.summary["linter_available"], false);
        assert!(of_category(&output, Category::LintViolation).is_empty());
        assert_eq!(output.scanned, 1);
    }

    #[test]
    fn test_parse_lint_output() {
        let text = "src/m.py:3:1: F401 'os' imported but unused\nFound 1 error.\nsrc/m.py:10:80: E501 line too long (88 > 79 characters)\n";
        let messages = parse_lint_output(text);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].line, 3);
        assert_eq!(messages[0].code, "F401");
        assert_eq!(messages[1].column, 80);
        assert_eq!(lint_severity(&messages[0].code), Severity::Medium);
        assert_eq!(lint_severity(&messages[1].code), Severity::Low);
    }

    #[test]
    fn test_disabled_probe_finds_nothing() {
        assert!(!LinterProbe::detect(false).available());
    }
}
