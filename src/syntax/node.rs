//! Typed view over tree-sitter nodes and the visitor used by every pass.

use super::SyntaxKind;

/// A tree-sitter node paired with the source it was parsed from.
#[derive(Clone, Copy)]
pub struct SyntaxNode<'t> {
    node: tree_sitter::Node<'t>,
    source: &'t str,
}

impl<'t> SyntaxNode<'t> {
    pub fn new(node: tree_sitter::Node<'t>, source: &'t str) -> Self {
        Self { node, source }
    }

    pub fn kind(&self) -> SyntaxKind {
        SyntaxKind::from_ts(self.node.kind())
    }

    /// Raw tree-sitter kind (e.g. `"keyword_argument"`).
    pub fn ts_kind(&self) -> &'static str {
        self.node.kind()
    }

    pub fn raw(&self) -> tree_sitter::Node<'t> {
        self.node
    }

    pub fn text(&self) -> &'t str {
        self.source
            .get(self.node.start_byte()..self.node.end_byte())
            .unwrap_or("")
    }

    /// 1-indexed start line.
    pub fn start_line(&self) -> usize {
        self.node.start_position().row + 1
    }

    /// 1-indexed end line.
    pub fn end_line(&self) -> usize {
        self.node.end_position().row + 1
    }

    pub fn start_byte(&self) -> usize {
        self.node.start_byte()
    }

    pub fn end_byte(&self) -> usize {
        self.node.end_byte()
    }

    pub fn is_named(&self) -> bool {
        self.node.is_named()
    }

    pub fn child_count(&self) -> usize {
        self.node.child_count()
    }

    pub fn field(&self, name: &str) -> Option<SyntaxNode<'t>> {
        self.node
            .child_by_field_name(name)
            .map(|n| SyntaxNode::new(n, self.source))
    }

    pub fn parent(&self) -> Option<SyntaxNode<'t>> {
        self.node.parent().map(|n| SyntaxNode::new(n, self.source))
    }

    /// All children, anonymous tokens included.
    pub fn children(&self) -> Vec<SyntaxNode<'t>> {
        let mut cursor = self.node.walk();
        self.node
            .children(&mut cursor)
            .map(|n| SyntaxNode::new(n, self.source))
            .collect()
    }

    pub fn named_children(&self) -> Vec<SyntaxNode<'t>> {
        let mut cursor = self.node.walk();
        self.node
            .named_children(&mut cursor)
            .map(|n| SyntaxNode::new(n, self.source))
            .collect()
    }

    /// Named children other than comments.
    pub fn statements(&self) -> Vec<SyntaxNode<'t>> {
        self.named_children()
            .into_iter()
            .filter(|c| c.kind() != SyntaxKind::Comment)
            .collect()
    }

    /// Whether `self` lies within `other`'s byte range.
    pub fn is_within(&self, other: &SyntaxNode<'_>) -> bool {
        self.start_byte() >= other.start_byte() && self.end_byte() <= other.end_byte()
    }

    /// Iterate ancestors from the parent up to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = SyntaxNode<'t>> {
        std::iter::successors(self.parent(), |n| n.parent())
    }
}

impl std::fmt::Debug for SyntaxNode<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}..{}",
            self.node.kind(),
            self.start_line(),
            self.end_line()
        )
    }
}

/// Whether a visitor wants the walker to descend into a node's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Children,
    Skip,
}

/// Syntax tree visitor. [`walk`] dispatches on [`SyntaxKind`] with an
/// exhaustive match, so adding a kind forces every dispatch site to handle it.
pub trait Visitor<'t> {
    fn visit_module(&mut self, _node: SyntaxNode<'t>) -> Walk {
        Walk::Children
    }

    fn visit_function(&mut self, _node: SyntaxNode<'t>) -> Walk {
        Walk::Children
    }

    fn leave_function(&mut self, _node: SyntaxNode<'t>) {}

    fn visit_class(&mut self, _node: SyntaxNode<'t>) -> Walk {
        Walk::Children
    }

    fn leave_class(&mut self, _node: SyntaxNode<'t>) {}

    /// if / elif / for / while / except / and-or / ternary / case.
    fn visit_decision(&mut self, _node: SyntaxNode<'t>) -> Walk {
        Walk::Children
    }

    fn visit_try(&mut self, _node: SyntaxNode<'t>) -> Walk {
        Walk::Children
    }

    fn leave_try(&mut self, _node: SyntaxNode<'t>) {}

    fn visit_with(&mut self, _node: SyntaxNode<'t>) -> Walk {
        Walk::Children
    }

    fn leave_with(&mut self, _node: SyntaxNode<'t>) {}

    fn visit_call(&mut self, _node: SyntaxNode<'t>) -> Walk {
        Walk::Children
    }

    /// `global` and `nonlocal` declarations.
    fn visit_scope_declaration(&mut self, _node: SyntaxNode<'t>) -> Walk {
        Walk::Children
    }

    /// Plain, augmented and `del` targets.
    fn visit_assignment(&mut self, _node: SyntaxNode<'t>) -> Walk {
        Walk::Children
    }

    fn visit_import(&mut self, _node: SyntaxNode<'t>) -> Walk {
        Walk::Children
    }

    fn visit_other(&mut self, _node: SyntaxNode<'t>) -> Walk {
        Walk::Children
    }
}

/// Depth-first walk of `node` and its descendants.
pub fn walk<'t, V: Visitor<'t> + ?Sized>(visitor: &mut V, node: SyntaxNode<'t>) {
    let kind = node.kind();
    let flow = match kind {
        SyntaxKind::Module => visitor.visit_module(node),
        SyntaxKind::FunctionDef => visitor.visit_function(node),
        SyntaxKind::ClassDef => visitor.visit_class(node),
        SyntaxKind::If
        | SyntaxKind::Elif
        | SyntaxKind::For
        | SyntaxKind::While
        | SyntaxKind::Except
        | SyntaxKind::BooleanOp
        | SyntaxKind::Conditional
        | SyntaxKind::Case => visitor.visit_decision(node),
        SyntaxKind::Try => visitor.visit_try(node),
        SyntaxKind::With => visitor.visit_with(node),
        SyntaxKind::Call => visitor.visit_call(node),
        SyntaxKind::Global | SyntaxKind::Nonlocal => visitor.visit_scope_declaration(node),
        SyntaxKind::Assignment | SyntaxKind::AugmentedAssignment | SyntaxKind::Delete => {
            visitor.visit_assignment(node)
        }
        SyntaxKind::Import => visitor.visit_import(node),
        SyntaxKind::Decorated
        | SyntaxKind::Block
        | SyntaxKind::Else
        | SyntaxKind::Finally
        | SyntaxKind::Match
        | SyntaxKind::Return
        | SyntaxKind::Raise
        | SyntaxKind::Lambda
        | SyntaxKind::ExpressionStatement
        | SyntaxKind::String
        | SyntaxKind::Comment
        | SyntaxKind::Identifier
        | SyntaxKind::Attribute
        | SyntaxKind::Error
        | SyntaxKind::Other => visitor.visit_other(node),
    };

    if flow == Walk::Children {
        for child in node.named_children() {
            walk(visitor, child);
        }
    }

    match kind {
        SyntaxKind::FunctionDef => visitor.leave_function(node),
        SyntaxKind::ClassDef => visitor.leave_class(node),
        SyntaxKind::Try => visitor.leave_try(node),
        SyntaxKind::With => visitor.leave_with(node),
        _ => {}
    }
}
