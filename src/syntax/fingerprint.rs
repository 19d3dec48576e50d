//! Structural hashing and token normalization for clone detection.

use sha2::{Digest, Sha256};

use super::{SyntaxKind, SyntaxNode};

/// Hash the shape of a subtree with identifier names normalized out.
///
/// Comments and docstrings are ignored; literal values and operators are
/// kept, so `x + 1` and `y + 1` hash alike while `x + 1` and `x - 1` do not.
pub fn structural_hash(node: SyntaxNode<'_>) -> String {
    let mut hasher = Sha256::new();
    feed_structure(&mut hasher, node);
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

fn feed_structure(hasher: &mut Sha256, node: SyntaxNode<'_>) {
    match node.kind() {
        SyntaxKind::Comment => return,
        SyntaxKind::Identifier => {
            hasher.update(b"id;");
            return;
        }
        SyntaxKind::String => {
            hasher.update(b"str:");
            hasher.update(node.text().as_bytes());
            hasher.update(b";");
            return;
        }
        _ => {}
    }

    if node.child_count() == 0 {
        // Leaf tokens: keywords, operators, numbers, true/false/none
        hasher.update(node.ts_kind().as_bytes());
        if matches!(node.ts_kind(), "integer" | "float") {
            hasher.update(b":");
            hasher.update(node.text().as_bytes());
        }
        hasher.update(b";");
        return;
    }

    hasher.update(node.ts_kind().as_bytes());
    hasher.update(b"(");
    let skip_docstring = node.kind() == SyntaxKind::Block;
    for (i, child) in node.children().into_iter().enumerate() {
        if skip_docstring && i == 0 && is_docstring_statement(&child) {
            continue;
        }
        feed_structure(hasher, child);
    }
    hasher.update(b")");
}

/// Leaf tokens of a subtree (comments dropped, strings kept whole).
pub fn normalized_tokens(node: SyntaxNode<'_>) -> Vec<String> {
    let mut tokens = Vec::new();
    collect_tokens(node, &mut tokens);
    tokens
}

fn collect_tokens(node: SyntaxNode<'_>, tokens: &mut Vec<String>) {
    match node.kind() {
        SyntaxKind::Comment => {}
        SyntaxKind::String => tokens.push(node.text().to_string()),
        _ if node.child_count() == 0 => {
            let text = node.text().trim();
            if !text.is_empty() {
                tokens.push(text.to_string());
            }
        }
        _ => {
            for child in node.children() {
                collect_tokens(child, tokens);
            }
        }
    }
}

/// Whitespace- and comment-free rendering of a subtree.
pub fn normalized_text(node: SyntaxNode<'_>) -> String {
    normalized_tokens(node).join(" ")
}

/// An expression statement consisting of a single string literal.
pub fn is_docstring_statement(node: &SyntaxNode<'_>) -> bool {
    if node.kind() != SyntaxKind::ExpressionStatement {
        return false;
    }
    let named = node.named_children();
    named.len() == 1 && named[0].kind() == SyntaxKind::String
}

/// Docstring of a block (module, class or function body), if any.
pub fn block_docstring(block: SyntaxNode<'_>) -> Option<String> {
    let first = block.statements().into_iter().next()?;
    if !is_docstring_statement(&first) {
        return None;
    }
    let literal = first.named_children().into_iter().next()?;
    Some(string_literal_value(literal.text()))
}

/// Strip prefixes and quotes from a Python string literal.
pub fn string_literal_value(raw: &str) -> String {
    let body = raw.trim_start_matches(|c: char| "rRuUbBfF".contains(c));
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if body.len() >= quote.len() * 2 && body.starts_with(quote) && body.ends_with(quote) {
            return body[quote.len()..body.len() - quote.len()].trim().to_string();
        }
    }
    body.trim().to_string()
}
