//! Shared state mutated from thread entry points.

use std::collections::BTreeSet;
use std::path::Path;

use super::model::{FunctionScope, ModuleModel};
use crate::analyzers::{Category, Finding, Severity};

fn unguarded_globals(scope: &FunctionScope) -> BTreeSet<&str> {
    if scope.acquires_lock {
        return BTreeSet::new();
    }
    scope
        .mutated_globals()
        .filter(|w| !w.guarded)
        .map(|w| w.name.as_str())
        .collect()
}

fn unguarded_containers<'m>(scope: &'m FunctionScope, model: &ModuleModel) -> BTreeSet<&'m str> {
    if scope.acquires_lock {
        return BTreeSet::new();
    }
    scope
        .container_mutations
        .iter()
        .filter(|w| !w.guarded)
        .filter(|w| model.bindings.contains_key(&w.name) && !scope.locals.contains(&w.name))
        .map(|w| w.name.as_str())
        .collect()
}

/// Flag thread targets that write module-level state without a lock.
pub fn check(model: &ModuleModel, rel: &Path) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut reported = BTreeSet::new();

    for target in &model.thread_targets {
        for scope in model.functions.iter().filter(|f| f.name == target.name) {
            if !reported.insert((scope.line, target.name.as_str())) {
                continue;
            }

            let globals = unguarded_globals(scope);
            let containers = unguarded_containers(scope, model);
            let (severity, names, what) = if !globals.is_empty() {
                (Severity::High, globals, "rebinds global")
            } else if !containers.is_empty() {
                (Severity::Medium, containers, "mutates shared")
            } else {
                continue;
            };

            findings.push(
                Finding::new(
                    Category::ThreadingIssue,
                    severity,
                    rel,
                    format!(
                        "{} runs in a thread and {} {} without holding a lock",
                        scope.context_label(),
                        what,
                        names
                            .iter()
                            .map(|n| format!("`{}`", n))
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                )
                .at_line(target.line)
                .recommend("Guard the shared state with a threading.Lock or hand results back through a queue"),
            );
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::conflicts::model;
    use crate::syntax::parse_python;

    fn findings(source: &str) -> Vec<Finding> {
        let parsed = parse_python("m.py", source).unwrap();
        check(&model::build(parsed.root()), Path::new("m.py"))
    }

    #[test]
    fn test_unlocked_global_in_thread_target_is_high() {
        let found = findings(
            r#"
import threading
hits = 0

def worker():
    global hits
    hits += 1

threading.Thread(target=worker).start()
"#,
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::High);
        assert_eq!(found[0].line_number, Some(9));
    }

    #[test]
    fn test_locked_mutation_is_fine() {
        let found = findings(
            r#"
import threading
hits = 0
lock = threading.Lock()

def worker():
    global hits
    with lock:
        hits += 1

threading.Thread(target=worker).start()
"#,
        );
        assert!(found.is_empty());
    }

    #[test]
    fn test_shared_container_is_medium() {
        let found = findings(
            r#"
from concurrent.futures import ThreadPoolExecutor
results = []

def fetch(url):
    results.append(url)

with ThreadPoolExecutor() as pool:
    pool.map(fetch, ["a", "b"])
"#,
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Medium);
        assert!(found[0].description.contains("`results`"));
    }

    #[test]
    fn test_function_not_run_in_thread_is_ignored() {
        let found = findings("count = 0\n\ndef bump():\n    global count\n    count += 1\n");
        assert!(found.is_empty());
    }
}
