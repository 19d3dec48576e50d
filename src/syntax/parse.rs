//! Parsing Python sources into syntax trees.

use once_cell::sync::Lazy;
use tree_sitter::{Language, Parser};

use super::SyntaxNode;
use crate::error::{AnalysisFailure, SyntaxError};

pub(crate) static PYTHON: Lazy<Language> = Lazy::new(|| tree_sitter_python::LANGUAGE.into());

/// Holds a parsed tree-sitter tree and the source it was built from.
///
/// Kept separate from extracted facts so several passes can reuse the tree
/// without re-parsing.
pub struct ParsedFile {
    /// The tree-sitter parse tree.
    pub tree: tree_sitter::Tree,
    /// The original source code (kept for node text extraction).
    pub source: String,
    /// The file path (for error reporting).
    pub path: String,
}

impl ParsedFile {
    pub fn root(&self) -> SyntaxNode<'_> {
        SyntaxNode::new(self.tree.root_node(), &self.source)
    }

    pub fn source_str(&self) -> &str {
        &self.source
    }

    pub fn line_count(&self) -> usize {
        self.source.lines().count()
    }

    /// Rough in-memory footprint, used for cache accounting.
    pub fn estimated_size(&self) -> u64 {
        // tree-sitter nodes cost several times the source they cover
        (self.source.len() as u64).saturating_mul(4)
    }
}

impl std::fmt::Debug for ParsedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedFile")
            .field("path", &self.path)
            .field("bytes", &self.source.len())
            .finish()
    }
}

/// Parse Python source.
///
/// Trees containing ERROR or MISSING nodes are rejected with a
/// [`SyntaxError`] pointing at the first invalid line.
pub fn parse_python(path: &str, source: &str) -> Result<ParsedFile, AnalysisFailure> {
    let mut parser = Parser::new();
    parser
        .set_language(&PYTHON)
        .map_err(|e| AnalysisFailure::Internal(format!("loading Python grammar: {}", e)))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| AnalysisFailure::Internal(format!("parser gave up on {}", path)))?;

    let root = tree.root_node();
    if root.has_error() {
        let (line, message) = first_error(root);
        return Err(SyntaxError {
            path: path.to_string(),
            line,
            message,
        }
        .into());
    }

    Ok(ParsedFile {
        tree,
        source: source.to_string(),
        path: path.to_string(),
    })
}

/// Locate the first ERROR or MISSING node in document order.
fn first_error(root: tree_sitter::Node) -> (usize, String) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_missing() {
            return (
                node.start_position().row + 1,
                format!("missing {}", node.kind()),
            );
        }
        if node.is_error() {
            return (node.start_position().row + 1, "invalid syntax".to_string());
        }
        if node.has_error() {
            let mut cursor = node.walk();
            let children: Vec<_> = node.children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }
    (1, "invalid syntax".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_source() {
        let parsed = parse_python("ok.py", "def f(x):\n    return x + 1\n").unwrap();
        assert_eq!(parsed.root().kind(), crate::syntax::SyntaxKind::Module);
        assert_eq!(parsed.line_count(), 2);
    }

    #[test]
    fn test_parse_invalid_source_reports_line() {
        let err = parse_python("bad.py", "x = 1\n\ndef broken(:\n    pass\n").unwrap_err();
        match err {
            AnalysisFailure::Syntax(e) => {
                assert_eq!(e.path, "bad.py");
                assert_eq!(e.line, 3);
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }
}
