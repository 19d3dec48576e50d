//! Module-level state written from several functions.

use std::collections::BTreeMap;
use std::path::Path;

use super::model::{FunctionScope, ModuleModel};
use crate::analyzers::{Category, Finding, Severity};

/// Report each module-level name that two or more functions rebind
/// through `global`.
pub fn check(model: &ModuleModel, rel: &Path) -> Vec<Finding> {
    let mut mutators: BTreeMap<&str, Vec<(&FunctionScope, usize)>> = BTreeMap::new();
    for scope in &model.functions {
        let mut seen = std::collections::BTreeSet::new();
        for write in scope.mutated_globals() {
            if seen.insert(write.name.as_str()) {
                mutators
                    .entry(write.name.as_str())
                    .or_default()
                    .push((scope, write.line));
            }
        }
    }

    mutators
        .into_iter()
        .filter(|(_, users)| users.len() >= 2)
        .map(|(name, users)| {
            let mut contexts: Vec<String> = Vec::new();
            if let Some(line) = model.bindings.get(name) {
                contexts.push(format!("module-level (line {})", line));
            }
            contexts.extend(
                users
                    .iter()
                    .map(|(scope, line)| format!("{} (line {})", scope.context_label(), line)),
            );
            let line = model
                .bindings
                .get(name)
                .copied()
                .unwrap_or(users[0].1);

            Finding::new(
                Category::GlobalVariableConflict,
                Severity::Medium,
                rel,
                format!(
                    "global `{}` is mutated by {} functions: {}",
                    name,
                    users.len(),
                    contexts.join(", ")
                ),
            )
            .at_line(line)
            .recommend(
                "Encapsulate the shared state in a class or pass it explicitly instead of using `global`",
            )
        })
        .collect()
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
    fn test_two_mutators_conflict() {
        let found = findings(
            r#"
state = None

def load():
    global state
    state = 1

class Service:
    def reset(self):
        global state
        state = None
"#,
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line_number, Some(2));
        assert!(found[0].description.contains("function `load`"));
        assert!(found[0].description.contains("class-method `Service.reset`"));
        assert!(found[0].description.contains("module-level"));
    }

    #[test]
    fn test_single_mutator_or_read_only_is_fine() {
        let found = findings(
            r#"
state = None

def load():
    global state
    state = 1

def read():
    global state
    return state
"#,
        );
        assert!(found.is_empty());
    }
}
