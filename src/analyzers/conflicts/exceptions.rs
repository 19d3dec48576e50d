//! Calls known to raise, made outside a `try` that handles the error.

use std::path::Path;

use phf::phf_map;

use crate::analyzers::{Category, Finding, Severity};
use crate::syntax::{walk, SyntaxKind, SyntaxNode, Visitor, Walk};

/// Callee -> (exception class raised, severity when unhandled).
static RISKY_CALLS: phf::Map<&'static str, (&'static str, Severity)> = phf_map! {
    "int" => ("ValueError", Severity::Low),
    "float" => ("ValueError", Severity::Low),
    "open" => ("OSError", Severity::High),
    "io.open" => ("OSError", Severity::High),
    "json.load" => ("JSONDecodeError", Severity::Medium),
    "json.loads" => ("JSONDecodeError", Severity::Medium),
    "os.remove" => ("OSError", Severity::Medium),
    "os.unlink" => ("OSError", Severity::Medium),
    "os.rename" => ("OSError", Severity::Medium),
    "os.replace" => ("OSError", Severity::Medium),
    "os.mkdir" => ("OSError", Severity::Medium),
    "os.makedirs" => ("OSError", Severity::Medium),
    "os.rmdir" => ("OSError", Severity::Medium),
    "os.listdir" => ("OSError", Severity::Medium),
    "shutil.copy" => ("OSError", Severity::Medium),
    "shutil.copyfile" => ("OSError", Severity::Medium),
    "shutil.move" => ("OSError", Severity::Medium),
    "shutil.rmtree" => ("OSError", Severity::Medium),
    "subprocess.check_call" => ("CalledProcessError", Severity::Medium),
    "subprocess.check_output" => ("CalledProcessError", Severity::Medium),
    "requests.get" => ("RequestException", Severity::Medium),
    "requests.post" => ("RequestException", Severity::Medium),
    "pickle.load" => ("UnpicklingError", Severity::Medium),
    "pickle.loads" => ("UnpicklingError", Severity::Medium),
    "yaml.safe_load" => ("YAMLError", Severity::Medium),
    "yaml.load" => ("YAMLError", Severity::Medium),
};

/// Exception class -> direct parent.
static EXCEPTION_PARENTS: phf::Map<&'static str, &'static str> = phf_map! {
    "JSONDecodeError" => "ValueError",
    "UnicodeDecodeError" => "UnicodeError",
    "UnicodeError" => "ValueError",
    "ValueError" => "Exception",
    "FileNotFoundError" => "OSError",
    "PermissionError" => "OSError",
    "IsADirectoryError" => "OSError",
    "RequestException" => "OSError",
    "OSError" => "Exception",
    "CalledProcessError" => "SubprocessError",
    "SubprocessError" => "Exception",
    "UnpicklingError" => "PickleError",
    "PickleError" => "Exception",
    "YAMLError" => "Exception",
    "Exception" => "BaseException",
};

fn canonical(name: &str) -> &str {
    let short = name.rsplit('.').next().unwrap_or(name);
    match short {
        "IOError" | "EnvironmentError" => "OSError",
        _ => short,
    }
}

/// Whether an `except <handler>` clause catches `raised`.
fn covers(handler: &str, raised: &str) -> bool {
    let handler = canonical(handler);
    if matches!(handler, "Exception" | "BaseException") {
        return true;
    }
    let mut current = raised;
    loop {
        if current == handler {
            return true;
        }
        match EXCEPTION_PARENTS.get(current) {
            Some(parent) => current = parent,
            None => return false,
        }
    }
}

/// Exception names an except clause lists; `None` for a bare `except:`.
fn handled_names(clause: SyntaxNode<'_>) -> Option<Vec<String>> {
    let first = clause
        .named_children()
        .into_iter()
        .find(|c| !matches!(c.kind(), SyntaxKind::Block | SyntaxKind::Comment))?;
    let types = if first.ts_kind() == "as_pattern" {
        first.named_children().into_iter().next()?
    } else {
        first
    };
    let names = match types.ts_kind() {
        "tuple" | "parenthesized_expression" | "expression_list" => types
            .named_children()
            .into_iter()
            .map(|n| n.text().to_string())
            .collect(),
        _ => vec![types.text().to_string()],
    };
    Some(names)
}

/// A handler around `call` (up to the enclosing function) catches `raised`.
fn is_handled(call: SyntaxNode<'_>, raised: &str) -> bool {
    for ancestor in call.ancestors() {
        match ancestor.kind() {
            SyntaxKind::FunctionDef | SyntaxKind::Lambda | SyntaxKind::ClassDef => return false,
            SyntaxKind::Try => {
                let in_body = ancestor
                    .field("body")
                    .map(|body| call.is_within(&body))
                    .unwrap_or(false);
                if !in_body {
                    continue;
                }
                for clause in ancestor
                    .named_children()
                    .into_iter()
                    .filter(|c| c.kind() == SyntaxKind::Except)
                {
                    match handled_names(clause) {
                        None => return true,
                        Some(names) if names.iter().any(|n| covers(n, raised)) => return true,
                        Some(_) => {}
                    }
                }
            }
            _ => {}
        }
    }
    false
}

fn all_literal_arguments(call: SyntaxNode<'_>) -> bool {
    call.field("arguments")
        .map(|args| {
            args.named_children().iter().all(|a| {
                matches!(
                    a.ts_kind(),
                    "integer" | "float" | "string" | "true" | "false" | "none" | "comment"
                )
            })
        })
        .unwrap_or(true)
}

#[derive(Default)]
struct RiskyCallFinder<'t> {
    calls: Vec<(SyntaxNode<'t>, &'static str, &'static str, Severity)>,
}

impl<'t> Visitor<'t> for RiskyCallFinder<'t> {
    fn visit_call(&mut self, node: SyntaxNode<'t>) -> Walk {
        if let Some(function) = node.field("function") {
            if let Some((&callee, &(raised, severity))) = RISKY_CALLS.get_entry(function.text()) {
                let conversion = matches!(callee, "int" | "float");
                if !(conversion && all_literal_arguments(node)) {
                    self.calls.push((node, callee, raised, severity));
                }
            }
        }
        Walk::Children
    }
}

pub fn check(root: SyntaxNode<'_>, rel: &Path) -> Vec<Finding> {
    let mut finder = RiskyCallFinder::default();
    walk(&mut finder, root);

    finder
        .calls
        .into_iter()
        .filter(|(call, _, raised, _)| !is_handled(*call, raised))
        .map(|(call, callee, raised, severity)| {
            Finding::new(
                Category::UnhandledException,
                severity,
                rel,
                format!("`{}` can raise {} outside a matching try/except", callee, raised),
            )
            .at_line(call.start_line())
            .recommend(format!(
                "Wrap the call in `try`/`except {}` (or a parent class) and handle the failure",
                raised
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_python;

    fn findings(source: &str) -> Vec<Finding> {
        let parsed = parse_python("m.py", source).unwrap();
        check(parsed.root(), Path::new("m.py"))
    }

    #[test]
    fn test_hierarchy() {
        assert!(covers("ValueError", "JSONDecodeError"));
        assert!(covers("json.JSONDecodeError", "JSONDecodeError"));
        assert!(covers("IOError", "OSError"));
        assert!(covers("Exception", "YAMLError"));
        assert!(!covers("KeyError", "ValueError"));
        assert!(!covers("OSError", "ValueError"));
    }

    #[test]
    fn test_uncovered_json_parse() {
        let found = findings("import json\n\ndef load(s):\n    return json.loads(s)\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Medium);
        assert_eq!(found[0].line_number, Some(4));
        assert!(found[0].description.contains("JSONDecodeError"));
    }

    #[test]
    fn test_parent_handler_covers() {
        let source = "import json\n\ndef load(s):\n    try:\n        return json.loads(s)\n    except ValueError as exc:\n        return None\n";
        assert!(findings(source).is_empty());
    }

    #[test]
    fn test_tuple_and_bare_handlers() {
        let tuple = "def size(p):\n    try:\n        return int(p)\n    except (TypeError, ValueError):\n        return 0\n";
        assert!(findings(tuple).is_empty());
        let bare = "def read(p):\n    try:\n        fh = open(p)\n    except:\n        fh = None\n";
        assert!(findings(bare).is_empty());
    }

    #[test]
    fn test_wrong_handler_and_handler_body() {
        let source = "def read(p):\n    try:\n        return int(p)\n    except KeyError:\n        return open(p)\n";
        let found = findings(source);
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|f| f.severity == Severity::High));
    }

    #[test]
    fn test_literal_conversion_is_ignored() {
        assert!(findings("LIMIT = int(\"10\")\nRATIO = float(0.5)\n").is_empty());
    }

    #[test]
    fn test_try_outside_function_does_not_cover_inner_def() {
        let source = "try:\n    def f(s):\n        return int(s)\nexcept ValueError:\n    pass\n";
        assert_eq!(findings(source).len(), 1);
    }
}
