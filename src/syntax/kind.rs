//! Closed set of node kinds the analyzers dispatch on.

/// Python syntax node kinds. Tree-sitter kinds the engine does not care about
/// collapse into [`SyntaxKind::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntaxKind {
    Module,
    FunctionDef,
    ClassDef,
    Decorated,
    Block,
    If,
    Elif,
    Else,
    For,
    While,
    Try,
    Except,
    Finally,
    With,
    Match,
    Case,
    Return,
    Raise,
    Global,
    Nonlocal,
    Assignment,
    AugmentedAssignment,
    Delete,
    Call,
    BooleanOp,
    Conditional,
    Lambda,
    Import,
    ExpressionStatement,
    String,
    Comment,
    Identifier,
    Attribute,
    Error,
    Other,
}

impl SyntaxKind {
    /// Map a tree-sitter-python node kind.
    pub fn from_ts(kind: &str) -> Self {
        match kind {
            "module" => SyntaxKind::Module,
            "function_definition" => SyntaxKind::FunctionDef,
            "class_definition" => SyntaxKind::ClassDef,
            "decorated_definition" => SyntaxKind::Decorated,
            "block" => SyntaxKind::Block,
            "if_statement" => SyntaxKind::If,
            "elif_clause" => SyntaxKind::Elif,
            "else_clause" => SyntaxKind::Else,
            "for_statement" => SyntaxKind::For,
            "while_statement" => SyntaxKind::While,
            "try_statement" => SyntaxKind::Try,
            "except_clause" | "except_group_clause" => SyntaxKind::Except,
            "finally_clause" => SyntaxKind::Finally,
            "with_statement" => SyntaxKind::With,
            "match_statement" => SyntaxKind::Match,
            "case_clause" => SyntaxKind::Case,
            "return_statement" => SyntaxKind::Return,
            "raise_statement" => SyntaxKind::Raise,
            "global_statement" => SyntaxKind::Global,
            "nonlocal_statement" => SyntaxKind::Nonlocal,
            "assignment" => SyntaxKind::Assignment,
            "augmented_assignment" => SyntaxKind::AugmentedAssignment,
            "delete_statement" => SyntaxKind::Delete,
            "call" => SyntaxKind::Call,
            "boolean_operator" => SyntaxKind::BooleanOp,
            "conditional_expression" => SyntaxKind::Conditional,
            "lambda" => SyntaxKind::Lambda,
            "import_statement" | "import_from_statement" | "future_import_statement" => {
                SyntaxKind::Import
            }
            "expression_statement" => SyntaxKind::ExpressionStatement,
            "string" | "concatenated_string" => SyntaxKind::String,
            "comment" => SyntaxKind::Comment,
            "identifier" => SyntaxKind::Identifier,
            "attribute" => SyntaxKind::Attribute,
            "ERROR" => SyntaxKind::Error,
            _ => SyntaxKind::Other,
        }
    }

    /// Decision points counted by cyclomatic complexity.
    pub fn is_decision_point(&self) -> bool {
        matches!(
            self,
            SyntaxKind::If
                | SyntaxKind::Elif
                | SyntaxKind::For
                | SyntaxKind::While
                | SyntaxKind::Except
                | SyntaxKind::BooleanOp
                | SyntaxKind::Conditional
                | SyntaxKind::Case
        )
    }

    /// Compound statements that own a body block.
    pub fn is_control_block(&self) -> bool {
        matches!(
            self,
            SyntaxKind::If | SyntaxKind::For | SyntaxKind::While | SyntaxKind::Try | SyntaxKind::With
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ts() {
        assert_eq!(SyntaxKind::from_ts("function_definition"), SyntaxKind::FunctionDef);
        assert_eq!(SyntaxKind::from_ts("except_group_clause"), SyntaxKind::Except);
        assert_eq!(SyntaxKind::from_ts("import_from_statement"), SyntaxKind::Import);
        assert_eq!(SyntaxKind::from_ts("list_comprehension"), SyntaxKind::Other);
    }

    #[test]
    fn test_decision_points() {
        assert!(SyntaxKind::Elif.is_decision_point());
        assert!(SyntaxKind::BooleanOp.is_decision_point());
        assert!(!SyntaxKind::Else.is_decision_point());
        assert!(!SyntaxKind::Try.is_decision_point());
    }
}
