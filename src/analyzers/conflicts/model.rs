//! Per-module scope model shared by the global-state and threading passes.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::syntax::{walk, SyntaxKind, SyntaxNode, Visitor, Walk};

/// Methods that mutate the container they are called on.
const MUTATING_METHODS: &[&str] = &[
    "append",
    "appendleft",
    "extend",
    "insert",
    "pop",
    "popitem",
    "remove",
    "clear",
    "update",
    "setdefault",
    "add",
    "discard",
];

const THREAD_CONSTRUCTS: &[&str] = &[
    "Thread",
    "Timer",
    "ThreadPoolExecutor",
    "ProcessPoolExecutor",
    "Pool",
    "Lock",
    "RLock",
    "Semaphore",
    "start_new_thread",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeContext {
    Function,
    Method(String),
}

/// A write to a name, with whether a lock was held.
#[derive(Debug, Clone)]
pub struct Write {
    pub name: String,
    pub line: usize,
    pub guarded: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionScope {
    pub name: String,
    pub context: ScopeContext,
    pub line: usize,
    /// Names declared with `global`.
    pub globals: BTreeSet<String>,
    /// Plain / augmented / `del` writes to bare names.
    pub assigned: Vec<Write>,
    /// In-place mutations (`x.append(..)`, `x[k] = v`, `x.attr = v`).
    pub container_mutations: Vec<Write>,
    /// Parameters and names bound without `global`.
    pub locals: HashSet<String>,
    pub acquires_lock: bool,
    guard_depth: usize,
}

impl FunctionScope {
    pub fn context_label(&self) -> String {
        match &self.context {
            ScopeContext::Function => format!("function `{}`", self.name),
            ScopeContext::Method(class) => format!("class-method `{}.{}`", class, self.name),
        }
    }

    /// Globals this function both declares and writes.
    pub fn mutated_globals(&self) -> impl Iterator<Item = &Write> {
        self.assigned
            .iter()
            .filter(move |w| self.globals.contains(&w.name))
    }
}

/// A callable handed to a thread, timer or executor.
#[derive(Debug, Clone)]
pub struct ThreadTarget {
    pub name: String,
    pub line: usize,
}

#[derive(Debug, Default)]
pub struct ModuleModel {
    pub functions: Vec<FunctionScope>,
    /// Module-level bindings and the line of their first assignment.
    pub bindings: BTreeMap<String, usize>,
    pub thread_targets: Vec<ThreadTarget>,
    pub thread_constructs: usize,
}

enum Frame {
    Class(String),
    Function(usize),
}

#[derive(Default)]
struct ModelBuilder {
    model: ModuleModel,
    frames: Vec<Frame>,
    /// One entry per `with` statement: whether it took a lock.
    with_locks: Vec<bool>,
}

impl ModelBuilder {
    fn current_function(&mut self) -> Option<&mut FunctionScope> {
        match self.frames.last() {
            Some(Frame::Function(idx)) => self.model.functions.get_mut(*idx),
            _ => None,
        }
    }

    fn record_target(&mut self, target: SyntaxNode<'_>) {
        let line = target.start_line();
        match target.ts_kind() {
            "identifier" => {
                let name = target.text().to_string();
                if self.frames.is_empty() {
                    self.model.bindings.entry(name).or_insert(line);
                } else if let Some(scope) = self.current_function() {
                    if !scope.globals.contains(&name) {
                        scope.locals.insert(name.clone());
                    }
                    let guarded = scope.guard_depth > 0;
                    scope.assigned.push(Write {
                        name,
                        line,
                        guarded,
                    });
                }
            }
            "subscript" | "attribute" => {
                let base = target
                    .field("value")
                    .or_else(|| target.field("object"))
                    .filter(|b| b.kind() == SyntaxKind::Identifier);
                if let (Some(base), Some(scope)) = (base, self.current_function()) {
                    let guarded = scope.guard_depth > 0;
                    scope.container_mutations.push(Write {
                        name: base.text().to_string(),
                        line,
                        guarded,
                    });
                }
            }
            "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list"
            | "expression_list" | "parenthesized_expression" => {
                for child in target.named_children() {
                    self.record_target(child);
                }
            }
            _ => {}
        }
    }
}

fn last_segment(text: &str) -> &str {
    text.rsplit('.').next().unwrap_or(text)
}

/// Name of the callable an argument refers to (`worker`, `self.worker`).
fn callable_name(arg: SyntaxNode<'_>) -> Option<String> {
    match arg.ts_kind() {
        "identifier" => Some(arg.text().to_string()),
        "attribute" => arg.field("attribute").map(|a| a.text().to_string()),
        _ => None,
    }
}

fn is_lockish(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("lock") || lower.contains("mutex") || lower.contains("semaphore")
}

impl<'t> Visitor<'t> for ModelBuilder {
    fn visit_function(&mut self, node: SyntaxNode<'t>) -> Walk {
        let name = node
            .field("name")
            .map(|n| n.text().to_string())
            .unwrap_or_default();
        let context = match self.frames.last() {
            Some(Frame::Class(class)) => ScopeContext::Method(class.clone()),
            _ => ScopeContext::Function,
        };
        let locals = crate::syntax::parameter_names(node).into_iter().collect();
        self.model.functions.push(FunctionScope {
            name,
            context,
            line: node.start_line(),
            globals: BTreeSet::new(),
            assigned: Vec::new(),
            container_mutations: Vec::new(),
            locals,
            acquires_lock: false,
            guard_depth: 0,
        });
        self.frames
            .push(Frame::Function(self.model.functions.len() - 1));
        Walk::Children
    }

    fn leave_function(&mut self, _node: SyntaxNode<'t>) {
        self.frames.pop();
    }

    fn visit_class(&mut self, node: SyntaxNode<'t>) -> Walk {
        let name = node
            .field("name")
            .map(|n| n.text().to_string())
            .unwrap_or_default();
        self.frames.push(Frame::Class(name));
        Walk::Children
    }

    fn leave_class(&mut self, _node: SyntaxNode<'t>) {
        self.frames.pop();
    }

    fn visit_with(&mut self, node: SyntaxNode<'t>) -> Walk {
        let clause = node
            .named_children()
            .into_iter()
            .find(|c| c.ts_kind() == "with_clause")
            .map(|c| c.text())
            .unwrap_or("");
        let locked = is_lockish(clause);
        if locked {
            if let Some(scope) = self.current_function() {
                scope.guard_depth += 1;
            }
        }
        self.with_locks.push(locked);
        Walk::Children
    }

    fn leave_with(&mut self, _node: SyntaxNode<'t>) {
        if self.with_locks.pop() == Some(true) {
            if let Some(scope) = self.current_function() {
                scope.guard_depth = scope.guard_depth.saturating_sub(1);
            }
        }
    }

    fn visit_scope_declaration(&mut self, node: SyntaxNode<'t>) -> Walk {
        if node.kind() == SyntaxKind::Global {
            let names: Vec<String> = node
                .named_children()
                .into_iter()
                .filter(|c| c.kind() == SyntaxKind::Identifier)
                .map(|c| c.text().to_string())
                .collect();
            if let Some(scope) = self.current_function() {
                for name in names {
                    scope.locals.remove(&name);
                    scope.globals.insert(name);
                }
            }
        }
        Walk::Skip
    }

    fn visit_assignment(&mut self, node: SyntaxNode<'t>) -> Walk {
        match node.kind() {
            SyntaxKind::Delete => {
                for target in node.named_children() {
                    self.record_target(target);
                }
            }
            _ => {
                if let Some(left) = node.field("left") {
                    self.record_target(left);
                }
            }
        }
        Walk::Children
    }

    fn visit_call(&mut self, node: SyntaxNode<'t>) -> Walk {
        let Some(callee) = node.field("function") else {
            return Walk::Children;
        };
        let callee_text = callee.text();
        let method = last_segment(callee_text);
        let args: Vec<SyntaxNode<'t>> = node
            .field("arguments")
            .map(|a| a.named_children())
            .unwrap_or_default();
        let positional: Vec<SyntaxNode<'t>> = args
            .iter()
            .copied()
            .filter(|a| a.ts_kind() != "keyword_argument" && a.kind() != SyntaxKind::Comment)
            .collect();
        let keyword = |name: &str| {
            args.iter()
                .filter(|a| a.ts_kind() == "keyword_argument")
                .find(|a| a.field("name").map(|n| n.text()) == Some(name))
                .and_then(|a| a.field("value"))
        };

        if THREAD_CONSTRUCTS.contains(&method) {
            self.model.thread_constructs += 1;
        }

        let is_method_call = callee.kind() == SyntaxKind::Attribute;
        let target = match method {
            "Thread" | "Process" => keyword("target"),
            "Timer" => keyword("function").or_else(|| positional.get(1).copied()),
            "start_new_thread" => positional.first().copied(),
            "submit" | "map" | "apply_async" | "imap" | "imap_unordered" | "starmap"
                if is_method_call =>
            {
                keyword("fn").or_else(|| positional.first().copied())
            }
            "run_in_executor" => positional.get(1).copied(),
            _ => None,
        };
        if let Some(name) = target.and_then(callable_name) {
            self.model.thread_targets.push(ThreadTarget {
                name,
                line: node.start_line(),
            });
        }

        if is_method_call {
            let object = callee.field("object");
            if method == "acquire" {
                if let Some(scope) = self.current_function() {
                    scope.acquires_lock = true;
                }
            } else if MUTATING_METHODS.contains(&method) {
                if let Some(object) = object.filter(|o| o.kind() == SyntaxKind::Identifier) {
                    let line = node.start_line();
                    if let Some(scope) = self.current_function() {
                        let guarded = scope.guard_depth > 0;
                        scope.container_mutations.push(Write {
                            name: object.text().to_string(),
                            line,
                            guarded,
                        });
                    }
                }
            }
        }
        Walk::Children
    }
}

/// Build the scope model for a module.
pub fn build(root: SyntaxNode<'_>) -> ModuleModel {
    let mut builder = ModelBuilder::default();
    walk(&mut builder, root);
    builder.model
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_python;

    #[test]
    fn test_model_tracks_globals_and_contexts() {
        let parsed = parse_python(
            "m.py",
            r#"
counter = 0
items = []

def bump():
    global counter
    counter += 1

class Worker:
    def run(self):
        global counter
        with self._lock:
            counter = 5
        items.append(1)
"#,
        )
        .unwrap();
        let model = build(parsed.root());

        assert_eq!(model.bindings.get("counter"), Some(&2));
        assert!(model.bindings.contains_key("items"));

        let bump = &model.functions[0];
        assert_eq!(bump.context, ScopeContext::Function);
        assert_eq!(bump.mutated_globals().count(), 1);
        assert!(!bump.mutated_globals().next().unwrap().guarded);

        let run = &model.functions[1];
        assert_eq!(run.context_label(), "class-method `Worker.run`");
        assert!(run.mutated_globals().next().unwrap().guarded);
        assert_eq!(run.container_mutations.len(), 1);
        assert_eq!(run.container_mutations[0].name, "items");
    }

    #[test]
    fn test_model_finds_thread_targets() {
        let parsed = parse_python(
            "m.py",
            r#"
import threading
from concurrent.futures import ThreadPoolExecutor

def work():
    pass

t = threading.Thread(target=work)
with ThreadPoolExecutor() as pool:
    pool.submit(self_check)
threading.Timer(1.0, work).start()
"#,
        )
        .unwrap();
        let model = build(parsed.root());
        let names: Vec<_> = model.thread_targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["work", "self_check", "work"]);
        assert!(model.thread_constructs >= 3);
    }
}
