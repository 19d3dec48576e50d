//! Design conflict detection.
//!
//! Four passes run over each module: global state written from several
//! functions, shared state mutated from thread entry points, resources not
//! released on every path, and calls that can raise outside a matching
//! handler.

mod exceptions;
mod globals;
mod model;
mod resources;
mod threading;

use std::collections::BTreeSet;
use std::path::PathBuf;

use super::{Analyzer, AnalyzerContext, AnalyzerOutput, Category};

const NAME: &str = "conflicts";

pub struct ConflictAnalyzer {
    ctx: AnalyzerContext,
}

impl ConflictAnalyzer {
    pub fn new(ctx: AnalyzerContext) -> Self {
        Self { ctx }
    }
}

impl Analyzer for ConflictAnalyzer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn analyze(&self, files: &[PathBuf]) -> AnalyzerOutput {
        let mut output = AnalyzerOutput::new(NAME);
        let mut thread_constructs = 0usize;

        self.ctx.for_each_file(NAME, files, &mut output, |path, findings| {
            let parsed = self.ctx.cache.get_tree(path)?;
            let rel = self.ctx.relative(path);
            let root = parsed.root();

            let model = model::build(root);
            thread_constructs += model.thread_constructs;

            findings.extend(globals::check(&model, &rel));
            findings.extend(threading::check(&model, &rel));
            findings.extend(resources::check(root, &rel));
            findings.extend(exceptions::check(root, &rel));
            Ok(())
        });

        let count = |category: Category| {
            output
                .findings
                .iter()
                .filter(|f| f.category == category)
                .count()
        };
        let global_variables = count(Category::GlobalVariableConflict);
        let threading_issues = count(Category::ThreadingIssue);
        let resource_issues = count(Category::ResourceLeak);
        let exception_issues = count(Category::UnhandledException);
        let files_with_conflicts = output
            .findings
            .iter()
            .filter(|f| f.category != Category::SyntaxError)
            .map(|f| f.file_path.clone())
            .collect::<BTreeSet<_>>()
            .len();

        output.set("global_variables", global_variables);
        output.set("threading_issues", threading_issues);
        output.set("resource_issues", resource_issues);
        output.set("exception_issues", exception_issues);
        output.set("files_with_conflicts", files_with_conflicts);
        output.set("threading_constructs", thread_constructs);

        self.ctx.finish(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::{of_category, project};
    use crate::analyzers::Severity;
    use crate::config::Settings;

    #[test]
    fn test_open_without_close_is_a_leak() {
        let (_temp, ctx, files) = project(
            &[("io_utils.py", "def head(path):\n    fh = open(path)\n    return fh.readline()\n")],
            Settings::default(),
        );
        let output = ConflictAnalyzer::new(ctx).analyze(&files);
        let leaks = of_category(&output, Category::ResourceLeak);
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].severity, Severity::High);
        assert_eq!(output.summary["resource_issues"], 1);
        assert_eq!(output.summary["files_with_conflicts"], 1);
    }

    #[test]
    fn test_global_conflict_across_functions() {
        let source = r#"
registry = {}

def register(name):
    global registry
    registry = dict(registry, name=name)

def reset():
    global registry
    registry = {}
"#;
        let (_temp, ctx, files) = project(&[("state.py", source)], Settings::default());
        let output = ConflictAnalyzer::new(ctx).analyze(&files);
        let conflicts = of_category(&output, Category::GlobalVariableConflict);
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].description.contains("function `register`"));
        assert!(conflicts[0].description.contains("function `reset`"));
        assert_eq!(output.summary["global_variables"], 1);
    }

    #[test]
    fn test_threshold_drops_low_findings() {
        let settings = Settings {
            severity_threshold: Severity::Medium,
            ..Settings::default()
        };
        let source = "def parse(raw):\n    return int(raw)\n";
        let (_temp, ctx, files) = project(&[("conv.py", source)], settings);
        let output = ConflictAnalyzer::new(ctx).analyze(&files);
        assert!(output.findings.is_empty());
    }

    #[test]
    fn test_syntax_error_is_reported_not_raised() {
        let (_temp, ctx, files) = project(
            &[("bad.py", "def f(:\n    pass\n"), ("ok.py", "x = 1\n")],
            Settings::default(),
        );
        let errors = ctx.errors.clone();
        let output = ConflictAnalyzer::new(ctx).analyze(&files);
        assert_eq!(of_category(&output, Category::SyntaxError).len(), 1);
        assert_eq!(output.scanned, 1);
        assert_eq!(errors.counts_by_analyzer().get("conflicts"), Some(&1));
    }
}
