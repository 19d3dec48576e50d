//! Python syntax layer: parsing, typed node views, visitors and fact extraction.

mod declarations;
mod facts;
pub mod fingerprint;
mod kind;
mod node;
mod parse;

pub use declarations::{count_statements, extract_module_facts, parameter_names};
pub use facts::{
    ControlFlowInfo, Declaration, DeclarationKind, FunctionBody, ModuleFacts, Span,
};
pub use kind::SyntaxKind;
pub use node::{walk, SyntaxNode, Visitor, Walk};
pub use parse::{parse_python, ParsedFile};
