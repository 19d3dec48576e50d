//! Resources acquired outside a scoped construct and not reliably released.

use std::path::Path;

use crate::analyzers::{Category, Finding, Severity};
use crate::syntax::{walk, SyntaxKind, SyntaxNode, Visitor, Walk};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceKind {
    File,
    Socket,
    Lock,
}

impl ResourceKind {
    fn label(&self) -> &'static str {
        match self {
            ResourceKind::File => "file",
            ResourceKind::Socket => "socket",
            ResourceKind::Lock => "lock",
        }
    }

    fn release_methods(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::File => &["close"],
            ResourceKind::Socket => &["close", "shutdown", "detach"],
            ResourceKind::Lock => &["release"],
        }
    }

    /// Severity when nothing ever releases the resource.
    fn never_released(&self) -> Severity {
        match self {
            ResourceKind::File | ResourceKind::Socket => Severity::High,
            ResourceKind::Lock => Severity::Medium,
        }
    }

    /// Severity when a release exists but some path skips it.
    fn partially_released(&self) -> Severity {
        match self {
            ResourceKind::File | ResourceKind::Socket => Severity::Medium,
            ResourceKind::Lock => Severity::Low,
        }
    }
}

fn classify(callee: &str) -> Option<ResourceKind> {
    match callee {
        "open" | "io.open" | "codecs.open" | "os.fdopen" | "gzip.open" | "bz2.open" => {
            Some(ResourceKind::File)
        }
        "socket" | "socket.socket" | "socket.create_connection" | "create_connection" => {
            Some(ResourceKind::Socket)
        }
        _ if callee.ends_with(".acquire") => Some(ResourceKind::Lock),
        _ => None,
    }
}

struct Acquisition<'t> {
    call: SyntaxNode<'t>,
    kind: ResourceKind,
}

#[derive(Default)]
struct AcquisitionFinder<'t> {
    found: Vec<Acquisition<'t>>,
}

impl<'t> Visitor<'t> for AcquisitionFinder<'t> {
    fn visit_call(&mut self, node: SyntaxNode<'t>) -> Walk {
        if let Some(kind) = node.field("function").and_then(|f| classify(f.text())) {
            self.found.push(Acquisition { call: node, kind });
        }
        Walk::Children
    }
}

/// Inside a `with` item, i.e. scoped acquisition.
fn is_scoped(call: SyntaxNode<'_>) -> bool {
    for ancestor in call.ancestors() {
        match ancestor.ts_kind() {
            "with_item" | "with_clause" => return true,
            "block" | "function_definition" | "module" => return false,
            _ => {}
        }
    }
    false
}

/// The expression the resource is bound to and released through.
fn handle(acq: &Acquisition<'_>) -> Option<String> {
    if acq.kind == ResourceKind::Lock {
        return acq
            .call
            .field("function")
            .and_then(|f| f.field("object"))
            .map(|o| o.text().to_string());
    }
    let parent = acq.call.parent()?;
    if parent.kind() == SyntaxKind::Assignment {
        let left = parent.field("left")?;
        if matches!(left.ts_kind(), "identifier" | "attribute") {
            return Some(left.text().to_string());
        }
    }
    None
}

fn enclosing_scope(node: SyntaxNode<'_>) -> Option<SyntaxNode<'_>> {
    node.ancestors()
        .find(|a| matches!(a.ts_kind(), "function_definition" | "module"))
}

struct ReleaseFinder<'t> {
    handle: String,
    methods: &'static [&'static str],
    found: Vec<SyntaxNode<'t>>,
}

impl<'t> Visitor<'t> for ReleaseFinder<'t> {
    fn visit_call(&mut self, node: SyntaxNode<'t>) -> Walk {
        let callee = node.field("function");
        if let Some(attr) = callee.filter(|c| c.kind() == SyntaxKind::Attribute) {
            let object = attr.field("object").map(|o| o.text());
            let method = attr.field("attribute").map(|a| a.text());
            if object == Some(self.handle.as_str())
                && method.map(|m| self.methods.contains(&m)).unwrap_or(false)
            {
                self.found.push(node);
            }
        }
        Walk::Children
    }
}

fn releases<'t>(scope: SyntaxNode<'t>, handle: &str, kind: ResourceKind) -> Vec<SyntaxNode<'t>> {
    let mut finder = ReleaseFinder {
        handle: handle.to_string(),
        methods: kind.release_methods(),
        found: Vec::new(),
    };
    walk(&mut finder, scope);
    finder.found
}

fn in_finally(node: SyntaxNode<'_>) -> bool {
    node.ancestors()
        .take_while(|a| a.ts_kind() != "function_definition")
        .any(|a| a.kind() == SyntaxKind::Finally)
}

/// Statement directly inside a block that contains `node`.
fn statement_of(node: SyntaxNode<'_>) -> Option<SyntaxNode<'_>> {
    let mut current = node;
    loop {
        let parent = current.parent()?;
        if matches!(parent.kind(), SyntaxKind::Block | SyntaxKind::Module) {
            return Some(current);
        }
        current = parent;
    }
}

/// A `return` or `raise` between two byte offsets inside `scope`.
fn exits_between(scope: SyntaxNode<'_>, start: usize, end: usize) -> bool {
    struct ExitFinder {
        start: usize,
        end: usize,
        found: bool,
    }
    impl<'t> Visitor<'t> for ExitFinder {
        fn visit_function(&mut self, _node: SyntaxNode<'t>) -> Walk {
            Walk::Skip
        }
        fn visit_other(&mut self, node: SyntaxNode<'t>) -> Walk {
            if matches!(node.kind(), SyntaxKind::Return | SyntaxKind::Raise)
                && node.start_byte() >= self.start
                && node.start_byte() < self.end
            {
                self.found = true;
            }
            Walk::Children
        }
    }

    let mut finder = ExitFinder {
        start,
        end,
        found: false,
    };
    for child in scope.named_children() {
        walk(&mut finder, child);
    }
    finder.found
}

/// Released on every path: in a `finally`, or later in the same block with
/// no early exit in between.
fn released_on_all_paths(acq: &Acquisition<'_>, release: SyntaxNode<'_>, scope: SyntaxNode<'_>) -> bool {
    if in_finally(release) {
        return true;
    }
    let (Some(acquire_stmt), Some(release_stmt)) = (statement_of(acq.call), statement_of(release))
    else {
        return false;
    };
    let same_block = acquire_stmt.parent().map(|p| p.raw().id())
        == release_stmt.parent().map(|p| p.raw().id());
    same_block
        && release_stmt.start_byte() > acquire_stmt.end_byte()
        && !exits_between(scope, acquire_stmt.end_byte(), release_stmt.start_byte())
}

pub fn check(root: SyntaxNode<'_>, rel: &Path) -> Vec<Finding> {
    let mut finder = AcquisitionFinder::default();
    walk(&mut finder, root);

    let mut findings = Vec::new();
    for acq in &finder.found {
        if is_scoped(acq.call) {
            continue;
        }
        let line = acq.call.start_line();
        let label = acq.kind.label();

        let Some(handle) = handle(acq) else {
            // Never bound to a name, so nothing can close it.
            findings.push(
                Finding::new(
                    Category::ResourceLeak,
                    acq.kind.never_released(),
                    rel,
                    format!("{} opened by `{}` is never closed", label, first_line(acq.call.text())),
                )
                .at_line(line)
                .recommend("Use a `with` statement so the resource is released on every path"),
            );
            continue;
        };

        let Some(scope) = enclosing_scope(acq.call) else {
            continue;
        };
        let mut found = releases(scope, &handle, acq.kind);
        if found.is_empty() && handle.starts_with("self.") {
            // Stored on the instance; another method may own the release.
            if !releases(root, &handle, acq.kind).is_empty() {
                continue;
            }
        }
        found.retain(|r| r.start_byte() > acq.call.end_byte() || in_finally(*r));

        let severity = if found.is_empty() {
            Some((acq.kind.never_released(), "is never released"))
        } else if found.iter().any(|r| released_on_all_paths(acq, *r, scope)) {
            None
        } else {
            Some((acq.kind.partially_released(), "is not released on every path"))
        };

        if let Some((severity, what)) = severity {
            findings.push(
                Finding::new(
                    Category::ResourceLeak,
                    severity,
                    rel,
                    format!("{} `{}` {}", label, handle, what),
                )
                .at_line(line)
                .recommend(match acq.kind {
                    ResourceKind::Lock => "Use `with lock:` or release it in a `finally` block",
                    _ => "Use a `with` statement or close it in a `finally` block",
                }),
            );
        }
    }
    findings
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
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
    fn test_open_without_close_leaks() {
        let found = findings("def read(p):\n    fh = open(p)\n    return fh.read()\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::High);
        assert_eq!(found[0].line_number, Some(2));
    }

    #[test]
    fn test_unbound_open_leaks() {
        let found = findings("data = open('x.txt').read()\n");
        assert_eq!(found.len(), 1);
        assert!(found[0].description.contains("never closed"));
    }

    #[test]
    fn test_with_statement_is_scoped() {
        assert!(findings("def read(p):\n    with open(p) as fh:\n        return fh.read()\n").is_empty());
    }

    #[test]
    fn test_close_in_finally_is_safe() {
        let source = "def read(p):\n    fh = open(p)\n    try:\n        return fh.read()\n    finally:\n        fh.close()\n";
        assert!(findings(source).is_empty());
    }

    #[test]
    fn test_straight_line_close_is_safe() {
        let source = "def write(p, s):\n    fh = open(p, 'w')\n    fh.write(s)\n    fh.close()\n";
        assert!(findings(source).is_empty());
    }

    #[test]
    fn test_early_return_skips_close() {
        let source = "def read(p, quick):\n    fh = open(p)\n    if quick:\n        return None\n    data = fh.read()\n    fh.close()\n    return data\n";
        let found = findings(source);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Medium);
    }

    #[test]
    fn test_lock_acquire_without_release() {
        let source = "def critical(lock):\n    lock.acquire()\n    do_work()\n";
        let found = findings(source);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Medium);
        assert!(found[0].description.contains("lock `lock`"));
    }

    #[test]
    fn test_instance_handle_closed_elsewhere() {
        let source = r#"
class Log:
    def open(self, p):
        self.fh = open(p, "a")

    def close(self):
        self.fh.close()
"#;
        assert!(findings(source).is_empty());
    }
}
