//! Declaration extraction for Python modules using tree-sitter queries.

use std::collections::HashSet;

use streaming_iterator::StreamingIterator;
use tree_sitter::{Query, QueryCursor};

use super::fingerprint::{block_docstring, structural_hash};
use super::parse::PYTHON;
use super::{
    walk, ControlFlowInfo, Declaration, DeclarationKind, FunctionBody, ModuleFacts, ParsedFile,
    Span, SyntaxKind, SyntaxNode, Visitor, Walk,
};
use crate::error::AnalysisFailure;

const DECLARATION_QUERY: &str = r#"
; Function definitions (decorated ones included)
(function_definition
  name: (identifier) @func_name
) @function

; Class definitions
(class_definition
  name: (identifier) @class_name
) @class
"#;

const CONTROL_FLOW_QUERY: &str = r#"
(if_statement) @if
(elif_clause) @elif
(for_statement) @loop
(while_statement) @loop
(conditional_expression) @ternary
(boolean_operator) @bool
(except_clause) @except
(case_clause) @case
"#;

fn compile(source: &str) -> Result<Query, AnalysisFailure> {
    Query::new(&PYTHON, source)
        .map_err(|e| AnalysisFailure::Internal(format!("invalid query: {}", e)))
}

/// Extract the module docstring and every function, method and class.
pub fn extract_module_facts(parsed: &ParsedFile) -> Result<ModuleFacts, AnalysisFailure> {
    let declarations = extract_declarations(parsed)?;
    Ok(ModuleFacts {
        path: parsed.path.clone(),
        module_docstring: block_docstring(parsed.root()),
        declarations,
    })
}

fn extract_declarations(parsed: &ParsedFile) -> Result<Vec<Declaration>, AnalysisFailure> {
    let query = compile(DECLARATION_QUERY)?;
    let flow_query = compile(CONTROL_FLOW_QUERY)?;
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&query, parsed.tree.root_node(), parsed.source.as_bytes());

    let mut declarations = Vec::new();
    let mut seen_positions = HashSet::new();

    while let Some(m) = matches.next() {
        let mut name = String::new();
        let mut kind = DeclarationKind::Function;
        let mut decl_node = None;

        for capture in m.captures {
            let node = SyntaxNode::new(capture.node, &parsed.source);
            match query.capture_names()[capture.index as usize] {
                "func_name" => {
                    name = node.text().to_string();
                    kind = DeclarationKind::Function;
                }
                "class_name" => {
                    name = node.text().to_string();
                    kind = DeclarationKind::Class;
                }
                "function" | "class" => decl_node = Some(node),
                _ => {}
            }
        }

        let Some(node) = decl_node else { continue };
        if name.is_empty() || !seen_positions.insert(node.start_byte()) {
            continue;
        }

        let (receiver, nested) = enclosing_scope(node);
        if kind == DeclarationKind::Function && receiver.is_some() {
            kind = DeclarationKind::Method;
        }

        let body = if kind.is_callable() {
            extract_function_body(parsed, &flow_query, node)
        } else {
            None
        };

        declarations.push(Declaration {
            name,
            kind,
            span: Span::from_node(&node),
            receiver,
            parameters: if kind.is_callable() {
                parameter_names(node)
            } else {
                Vec::new()
            },
            return_annotation: node.field("return_type").map(|n| n.text().to_string()),
            docstring: node.field("body").and_then(block_docstring),
            body,
            nested,
        });
    }

    declarations.sort_by_key(|d| d.span.start_byte);
    Ok(declarations)
}

/// Immediate class owner (for methods) and whether any function encloses the node.
fn enclosing_scope(node: SyntaxNode<'_>) -> (Option<String>, bool) {
    let mut receiver = None;
    let mut immediate = true;
    let mut nested = false;

    for ancestor in node.ancestors() {
        match ancestor.kind() {
            SyntaxKind::Block | SyntaxKind::Decorated => continue,
            SyntaxKind::ClassDef => {
                if immediate {
                    receiver = ancestor.field("name").map(|n| n.text().to_string());
                }
            }
            SyntaxKind::FunctionDef => nested = true,
            _ => {}
        }
        immediate = false;
    }

    (receiver, nested)
}

fn extract_function_body(
    parsed: &ParsedFile,
    flow_query: &Query,
    func: SyntaxNode<'_>,
) -> Option<FunctionBody> {
    let block = func.field("body")?;

    let mut returns = ReturnFinder::default();
    for stmt in block.named_children() {
        walk(&mut returns, stmt);
    }

    Some(FunctionBody {
        span: Span::from_node(&block),
        statement_count: count_statements(block),
        returns_value: returns.found,
        control_flow: extract_control_flow(parsed, flow_query, func, block),
        structural_hash: structural_hash(block),
    })
}

/// Count decision points in `block`, ignoring those inside nested functions.
fn extract_control_flow(
    parsed: &ParsedFile,
    query: &Query,
    func: SyntaxNode<'_>,
    block: SyntaxNode<'_>,
) -> ControlFlowInfo {
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, block.raw(), parsed.source.as_bytes());
    let mut info = ControlFlowInfo::default();

    while let Some(m) = matches.next() {
        for capture in m.captures {
            let node = SyntaxNode::new(capture.node, &parsed.source);
            let owner = node
                .ancestors()
                .find(|a| matches!(a.ts_kind(), "function_definition" | "lambda"));
            if owner.map(|o| o.raw().id()) != Some(func.raw().id()) {
                continue;
            }
            match query.capture_names()[capture.index as usize] {
                "if" | "elif" => info.if_count += 1,
                "loop" => info.loop_count += 1,
                "case" => info.case_count += 1,
                "ternary" => info.ternary_count += 1,
                "bool" => info.boolean_count += 1,
                "except" => info.catch_count += 1,
                _ => {}
            }
        }
    }

    info
}

/// Statements in a block, those of nested blocks included.
pub fn count_statements(block: SyntaxNode<'_>) -> usize {
    let mut count = 0;
    let mut stack = vec![block];
    while let Some(node) = stack.pop() {
        for child in node.named_children() {
            if child.kind() == SyntaxKind::Comment {
                continue;
            }
            if node.kind() == SyntaxKind::Block {
                count += 1;
            }
            stack.push(child);
        }
    }
    count
}

/// Parameter names in declaration order, splat markers and annotations removed.
pub fn parameter_names(func: SyntaxNode<'_>) -> Vec<String> {
    let Some(params) = func.field("parameters") else {
        return Vec::new();
    };

    params
        .named_children()
        .into_iter()
        .filter_map(|param| match param.ts_kind() {
            "identifier" => Some(param.text().to_string()),
            "keyword_separator" | "positional_separator" | "comment" => None,
            _ => param
                .field("name")
                .or_else(|| first_identifier(param))
                .map(|n| n.text().to_string()),
        })
        .collect()
}

fn first_identifier(node: SyntaxNode<'_>) -> Option<SyntaxNode<'_>> {
    for child in node.named_children() {
        if child.kind() == SyntaxKind::Identifier {
            return Some(child);
        }
        if let Some(found) = first_identifier(child) {
            return Some(found);
        }
    }
    None
}

#[derive(Default)]
struct ReturnFinder {
    found: bool,
}

impl<'t> Visitor<'t> for ReturnFinder {
    fn visit_function(&mut self, _node: SyntaxNode<'t>) -> Walk {
        Walk::Skip
    }

    fn visit_class(&mut self, _node: SyntaxNode<'t>) -> Walk {
        Walk::Skip
    }

    fn visit_other(&mut self, node: SyntaxNode<'t>) -> Walk {
        match node.kind() {
            SyntaxKind::Lambda => Walk::Skip,
            SyntaxKind::Return => {
                if node.named_children().iter().any(|v| v.ts_kind() != "none") {
                    self.found = true;
                }
                Walk::Skip
            }
            _ => Walk::Children,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_python;

    fn facts(source: &str) -> ModuleFacts {
        let parsed = parse_python("test.py", source).unwrap();
        extract_module_facts(&parsed).unwrap()
    }

    #[test]
    fn test_extract_functions_and_methods() {
        let module = facts(
            r#""""Module doc."""

def simple():
    pass

def with_args(x, y: int = 2, *rest, **opts) -> int:
    """Add things."""
    return x + y

class MyClass:
    @property
    def method(self):
        pass
"#,
        );

        assert_eq!(module.module_docstring.as_deref(), Some("Module doc."));

        let with_args = module.find_declaration("with_args").unwrap();
        assert_eq!(with_args.kind, DeclarationKind::Function);
        assert_eq!(with_args.parameters, vec!["x", "y", "rest", "opts"]);
        assert_eq!(with_args.return_annotation.as_deref(), Some("int"));
        assert_eq!(with_args.docstring.as_deref(), Some("Add things."));
        assert!(with_args.body.as_ref().unwrap().returns_value);

        let method = module.find_declaration("method").unwrap();
        assert_eq!(method.kind, DeclarationKind::Method);
        assert_eq!(method.qualified_name(), "MyClass.method");

        let class = module.find_declaration("MyClass").unwrap();
        assert_eq!(class.kind, DeclarationKind::Class);
        assert!(class.body.is_none());
    }

    #[test]
    fn test_nested_functions_are_marked() {
        let module = facts("def outer():\n    def inner():\n        return 1\n    return inner\n");
        assert!(!module.find_declaration("outer").unwrap().nested);
        assert!(module.find_declaration("inner").unwrap().nested);
    }

    #[test]
    fn test_control_flow_skips_nested_functions() {
        let module = facts(
            r#"
def check(a, b):
    if a and b:
        return 1
    elif a:
        return 2
    for x in b:
        pass
    try:
        pass
    except ValueError:
        pass

    def helper():
        if a:
            pass
    return 0
"#,
        );
        let check = module.find_declaration("check").unwrap();
        let flow = &check.body.as_ref().unwrap().control_flow;
        assert_eq!(flow.if_count, 2);
        assert_eq!(flow.boolean_count, 1);
        assert_eq!(flow.loop_count, 1);
        assert_eq!(flow.catch_count, 1);
        assert_eq!(check.complexity(), Some(6));
    }

    #[test]
    fn test_returns_value_ignores_bare_returns() {
        let module = facts("def f(x):\n    if x:\n        return\n    return None\n");
        assert!(!module.find_declaration("f").unwrap().body.as_ref().unwrap().returns_value);
    }

    #[test]
    fn test_count_statements_is_recursive() {
        let parsed = parse_python(
            "t.py",
            "def f(x):\n    a = 1\n    if x:\n        b = 2\n        c = 3\n    return a\n",
        )
        .unwrap();
        let func = parsed.root().named_children().into_iter().next().unwrap();
        assert_eq!(count_statements(func.field("body").unwrap()), 5);
    }
}
