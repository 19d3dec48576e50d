//! Fact structures extracted from syntax trees.

use std::fmt;

use super::SyntaxNode;

/// Source location span with byte offsets and line/column positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    /// Start byte offset (0-indexed).
    pub start_byte: usize,
    /// End byte offset (0-indexed, exclusive).
    pub end_byte: usize,
    /// Start line (1-indexed).
    pub start_line: usize,
    /// End line (1-indexed).
    pub end_line: usize,
}

impl Span {
    pub fn from_node(node: &SyntaxNode<'_>) -> Self {
        Self {
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            start_line: node.start_line(),
            end_line: node.end_line(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_line, self.end_line)
    }
}

/// Kind of declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclarationKind {
    Function,
    Method,
    Class,
}

impl DeclarationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclarationKind::Function => "function",
            DeclarationKind::Method => "method",
            DeclarationKind::Class => "class",
        }
    }

    /// Check if this is a callable (function or method).
    pub fn is_callable(&self) -> bool {
        matches!(self, DeclarationKind::Function | DeclarationKind::Method)
    }
}

impl fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Control flow information for cyclomatic complexity calculation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlFlowInfo {
    /// Number of if / elif branches.
    pub if_count: usize,
    /// Number of for/while loops.
    pub loop_count: usize,
    /// Number of match case clauses.
    pub case_count: usize,
    /// Number of `and` / `or` operators.
    pub boolean_count: usize,
    /// Number of ternary expressions.
    pub ternary_count: usize,
    /// Number of except clauses.
    pub catch_count: usize,
}

impl ControlFlowInfo {
    /// Calculate cyclomatic complexity.
    ///
    /// CC = 1 + decision_points
    /// Decision points: if, elif, for, while, case, and, or, ternary, except
    pub fn cyclomatic_complexity(&self) -> u32 {
        let decision_points = self.if_count
            + self.loop_count
            + self.case_count
            + self.boolean_count
            + self.ternary_count
            + self.catch_count;

        1 + decision_points as u32
    }
}

/// Information about a function body.
#[derive(Debug, Clone)]
pub struct FunctionBody {
    /// Span of the body block.
    pub span: Span,
    /// Statements in the body, nested blocks included.
    pub statement_count: usize,
    /// Whether any `return` hands back a value other than `None`.
    pub returns_value: bool,
    /// Control flow information for complexity.
    pub control_flow: ControlFlowInfo,
    /// Structural hash of the body with identifiers normalized away.
    pub structural_hash: String,
}

/// A declaration extracted from source code.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    pub kind: DeclarationKind,
    /// Span of the `def` / `class` statement (decorators excluded).
    pub span: Span,
    /// For methods: the enclosing class.
    pub receiver: Option<String>,
    /// Parameter names in order, without `*` / `**` markers.
    pub parameters: Vec<String>,
    pub return_annotation: Option<String>,
    pub docstring: Option<String>,
    /// Function body information (only for functions/methods).
    pub body: Option<FunctionBody>,
    /// Defined inside another function.
    pub nested: bool,
}

impl Declaration {
    /// Get the qualified name (`Class.method` for methods).
    pub fn qualified_name(&self) -> String {
        if let Some(ref recv) = self.receiver {
            format!("{}.{}", recv, self.name)
        } else {
            self.name.clone()
        }
    }

    pub fn is_dunder(&self) -> bool {
        self.name.starts_with("__") && self.name.ends_with("__")
    }

    /// Public API: not underscore-prefixed, not nested, and not a method of a
    /// private class.
    pub fn is_public(&self) -> bool {
        !self.nested
            && !self.name.starts_with('_')
            && !self
                .receiver
                .as_deref()
                .map(|r| r.starts_with('_'))
                .unwrap_or(false)
    }

    /// Parameters other than an implicit `self` / `cls` receiver.
    pub fn explicit_parameters(&self) -> impl Iterator<Item = &str> {
        let skip_first = self.kind == DeclarationKind::Method
            && matches!(
                self.parameters.first().map(String::as_str),
                Some("self") | Some("cls")
            );
        self.parameters
            .iter()
            .skip(usize::from(skip_first))
            .map(String::as_str)
    }

    pub fn complexity(&self) -> Option<u32> {
        self.body
            .as_ref()
            .map(|b| b.control_flow.cyclomatic_complexity())
    }
}

/// All facts extracted from a single module.
#[derive(Debug, Clone)]
pub struct ModuleFacts {
    /// File path.
    pub path: String,
    pub module_docstring: Option<String>,
    /// All declarations in the file, in source order.
    pub declarations: Vec<Declaration>,
}

impl ModuleFacts {
    /// Find a declaration by name.
    pub fn find_declaration(&self, name: &str) -> Option<&Declaration> {
        self.declarations.iter().find(|d| d.name == name)
    }

    /// Get all functions and methods.
    pub fn callables(&self) -> impl Iterator<Item = &Declaration> {
        self.declarations.iter().filter(|d| d.kind.is_callable())
    }
}
