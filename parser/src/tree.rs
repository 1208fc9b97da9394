//! Arena-backed syntax tree.
//!
//! Nodes live in one flat `Vec`; children and parents are [`NodeId`] indices,
//! so the parent link is a lookup and never an ownership edge. A tree is
//! immutable once [`crate::parse`] returns it.

use drover_types::{Position, Range};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarStyle {
    Plain,
    SingleQuoted,
    DoubleQuoted,
    Literal,
    Folded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// The whole text; always the root.
    Stream,
    Document,
    Mapping,
    Sequence,
    /// `key: value`. Children are the [`NodeKind::Key`] and, when present, the value.
    Pair,
    Key,
    Scalar(ScalarStyle),
    /// A `[..]` or `{..}` collection, kept as one opaque node.
    Flow,
    Alias,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    kind: NodeKind,
    range: Range,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    text: Option<String>,
    templated: bool,
}

impl Node {
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Source text of keys, scalars, flows and aliases (quotes removed).
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Whether the text contains a Jinja expression or statement.
    #[must_use]
    pub fn is_templated(&self) -> bool {
        self.templated
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxTree {
    nodes: Vec<Node>,
}

impl SyntaxTree {
    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// # Panics
    ///
    /// Panics if `id` did not come from this tree.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always holds at least the stream node.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(Node::parent)
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map_or(&[][..], Node::children)
    }

    /// `id`'s ancestors, nearest first, ending with the root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), |&current| self.parent(current))
    }

    /// Deepest node whose range contains `position`.
    #[must_use]
    pub fn node_at(&self, position: Position) -> Option<NodeId> {
        self.ancestry_at(position).last().copied()
    }

    /// Chain of nodes enclosing `position`, root first.
    #[must_use]
    pub fn ancestry_at(&self, position: Position) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = self.root();
        if !self.node(current).range.contains(position) {
            return chain;
        }
        chain.push(current);
        while let Some(&next) = self
            .children(current)
            .iter()
            .rev()
            .find(|&&child| self.node(child).range.contains(position))
        {
            chain.push(next);
            current = next;
        }
        chain
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeId(index as u32), node))
    }
}

/// Append-only construction of a [`SyntaxTree`].
#[derive(Debug)]
pub(crate) struct TreeBuilder {
    nodes: Vec<Node>,
}

impl TreeBuilder {
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Stream,
                range: Range::default(),
                parent: None,
                children: Vec::new(),
                text: None,
                templated: false,
            }],
        }
    }

    pub(crate) fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub(crate) fn push(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        range: Range,
        text: Option<String>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let templated = text.as_deref().is_some_and(is_templated);
        self.nodes.push(Node {
            kind,
            range,
            parent: Some(parent),
            children: Vec::new(),
            text,
            templated,
        });
        self.nodes[parent.index()].children.push(id);
        id
    }

    pub(crate) fn start(&self, id: NodeId) -> Position {
        self.nodes[id.index()].range.start
    }

    pub(crate) fn extend_to(&mut self, id: NodeId, end: Position) {
        let range = &mut self.nodes[id.index()].range;
        if end > range.end {
            range.end = end;
        }
    }

    pub(crate) fn append_text(&mut self, id: NodeId, line: &str, separator: char) {
        let node = &mut self.nodes[id.index()];
        let text = node.text.get_or_insert_with(String::new);
        if !text.is_empty() {
            text.push(separator);
        }
        text.push_str(line);
        node.templated = is_templated(text);
    }

    /// Stretch every node to cover its descendants and the stream to `end`.
    pub(crate) fn finish(mut self, end: Position) -> SyntaxTree {
        self.nodes[0].range = Range::new(Position::default(), end);
        // Children always have larger ids than their parents.
        for index in (1..self.nodes.len()).rev() {
            let child_end = self.nodes[index].range.end;
            if let Some(parent) = self.nodes[index].parent {
                let range = &mut self.nodes[parent.index()].range;
                if child_end > range.end {
                    range.end = child_end;
                }
            }
        }
        SyntaxTree { nodes: self.nodes }
    }
}

pub(crate) fn is_templated(text: &str) -> bool {
    text.contains("{{") || text.contains("{%")
}
