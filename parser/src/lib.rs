//! Structural parsing of playbook YAML.
//!
//! [`parse`] is pure and deterministic: the same text always yields an equal
//! [`ParseOutcome`]. Malformed input still produces a best-effort tree.
//!
//! ```
//! let outcome = drover_parser::parse("- hosts: all\n  tasks: []\n");
//! assert!(outcome.diagnostics.is_empty());
//! assert!(outcome.tree.len() > 1);
//! ```

mod scanner;
mod tree;
mod yaml;

pub use tree::{Node, NodeId, NodeKind, ScalarStyle, SyntaxTree};

use drover_types::Diagnostic;

/// A tree plus the structural diagnostics found while building it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    pub tree: SyntaxTree,
    /// Ordered by start position.
    pub diagnostics: Vec<Diagnostic>,
}

#[must_use]
pub fn parse(text: &str) -> ParseOutcome {
    let (tree, mut diagnostics) = scanner::scan(text);
    diagnostics.extend(yaml::syntax_error(text));
    diagnostics.sort_by_key(|diagnostic| diagnostic.range().start);

    tracing::trace!(
        nodes = tree.len(),
        diagnostics = diagnostics.len(),
        "Parsed document"
    );
    ParseOutcome { tree, diagnostics }
}
