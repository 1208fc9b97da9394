//! Indentation-driven scanner for block-style YAML.
//!
//! Builds the [`SyntaxTree`] line by line and reports the structural problems
//! editors care about. It never gives up: a bad line is reported and skipped,
//! and everything before and after it still lands in the tree. Exact YAML
//! conformance is left to `serde_yaml` (see `crate::yaml`).

use std::collections::HashSet;

use drover_types::{Diagnostic, Origin, Position, Range};

use crate::tree::{NodeId, NodeKind, ScalarStyle, SyntaxTree, TreeBuilder};

pub(crate) const TAB_INDENT: &str = "Tabs are not allowed as indentation";
pub(crate) const NESTED_COMPACT: &str = "Nested mappings are not allowed in compact mappings";
pub(crate) const BAD_MAPPING_INDENT: &str = "Bad indentation of a mapping entry";
pub(crate) const BAD_SEQUENCE_INDENT: &str = "Bad indentation of a sequence entry";
pub(crate) const DUPLICATE_KEY: &str = "Map keys must be unique";
pub(crate) const UNQUOTED_TEMPLATE: &str =
    "Values starting with a template expression must be quoted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Mapping,
    Sequence,
}

/// An open block collection.
#[derive(Debug)]
struct Frame {
    node: NodeId,
    indent: usize,
    kind: FrameKind,
    keys: HashSet<String>,
}

impl Frame {
    fn new(node: NodeId, indent: usize, kind: FrameKind) -> Self {
        Self {
            node,
            indent,
            kind,
            keys: HashSet::new(),
        }
    }
}

/// A `key:` or `-` whose value starts on a later line.
#[derive(Debug)]
struct Pending {
    parent: NodeId,
    min_indent: usize,
    /// `key:` may be followed by a sequence at the key's own indent.
    allows_same_indent_sequence: bool,
}

/// A `|` / `>` scalar or a plain scalar that may continue on deeper lines.
#[derive(Debug)]
struct Continuation {
    node: NodeId,
    min_indent: usize,
}

/// A quoted scalar or flow collection still open at the end of a line.
#[derive(Debug)]
enum Unclosed {
    Quote { node: NodeId, quote: u8 },
    Flow { node: NodeId, stack: Vec<u8> },
}

#[derive(Debug, Clone, Copy)]
enum Entry {
    Item,
    Pair { colon: usize },
    Scalar,
}

pub(crate) struct Scanner<'a> {
    lines: Vec<&'a str>,
    tree: TreeBuilder,
    diagnostics: Vec<Diagnostic>,
    document: Option<NodeId>,
    has_root: bool,
    frames: Vec<Frame>,
    pending: Option<Pending>,
    block: Option<Continuation>,
    plain: Option<Continuation>,
    unclosed: Option<Unclosed>,
}

pub(crate) fn scan(text: &str) -> (SyntaxTree, Vec<Diagnostic>) {
    let mut scanner = Scanner {
        lines: text.lines().collect(),
        tree: TreeBuilder::new(),
        diagnostics: Vec::new(),
        document: None,
        has_root: false,
        frames: Vec::new(),
        pending: None,
        block: None,
        plain: None,
        unclosed: None,
    };
    for line in 0..scanner.lines.len() {
        scanner.line(line);
    }
    scanner.finish(text)
}

impl Scanner<'_> {
    fn line(&mut self, line: usize) {
        let raw = self.lines[line];
        if self.continue_block(line, raw) || self.continue_unclosed(line, raw) {
            return;
        }

        let indent = raw.len() - raw.trim_start_matches([' ', '\t']).len();
        let content = strip_comment(&raw[indent..]).trim_end();
        if content.is_empty() {
            return;
        }
        if let Some(tab) = raw[..indent].find('\t') {
            let range = self.span(line, tab, tab + 1);
            self.diagnostics
                .push(Diagnostic::error(TAB_INDENT, range, Origin::Structure));
        }

        if indent == 0 {
            if is_marker(content, "---") {
                self.end_document();
                self.start_document(line);
                return;
            }
            if is_marker(content, "...") {
                self.end_document();
                return;
            }
            if content.starts_with('%') {
                return;
            }
        }
        if self.document.is_none() {
            self.start_document(line);
        }
        self.structure(line, indent, content);
    }

    fn structure(&mut self, line: usize, indent: usize, content: &str) {
        let entry = classify(content);

        if let Some(pending) = self.pending.take() {
            let same_indent_sequence = pending.allows_same_indent_sequence
                && indent + 1 == pending.min_indent
                && matches!(entry, Entry::Item);
            if indent >= pending.min_indent || same_indent_sequence {
                self.value_block(pending.parent, pending.min_indent, line, indent, content, entry);
                return;
            }
        }

        if let Some(plain) = self.plain.take()
            && indent >= plain.min_indent
            && !matches!(entry, Entry::Pair { .. })
        {
            let end = self.position(line, indent + content.len());
            self.tree.extend_to(plain.node, end);
            self.tree.append_text(plain.node, content, ' ');
            self.plain = Some(plain);
            return;
        }

        // Close collections the line is dedented out of. A sequence that
        // shares its indent with the parent mapping's keys ends at the next key.
        while let Some(top) = self.frames.last() {
            let closes_sequence = top.indent == indent
                && top.kind == FrameKind::Sequence
                && !matches!(entry, Entry::Item)
                && self
                    .frames
                    .len()
                    .checked_sub(2)
                    .map(|below| &self.frames[below])
                    .is_some_and(|below| {
                        below.kind == FrameKind::Mapping && below.indent == indent
                    });
            if top.indent > indent || closes_sequence {
                self.frames.pop();
            } else {
                break;
            }
        }

        let Some(top) = self.frames.last() else {
            if self.has_root {
                self.bad_indentation(line, indent, content, entry);
            } else if let Some(document) = self.document {
                self.has_root = true;
                self.value_block(document, 0, line, indent, content, entry);
            }
            return;
        };

        let frame = self.frames.len() - 1;
        if top.indent != indent {
            self.bad_indentation(line, indent, content, entry);
            return;
        }
        match (top.kind, entry) {
            (FrameKind::Mapping, Entry::Pair { colon }) => {
                self.pair(frame, line, indent, content, colon);
            }
            (FrameKind::Sequence, Entry::Item) => self.item(frame, line, indent, content),
            (FrameKind::Mapping, Entry::Item) | (FrameKind::Sequence, Entry::Pair { .. }) => {
                self.bad_indentation(line, indent, content, entry);
            }
            (_, Entry::Scalar) => {}
        }
    }

    /// A value that starts at the beginning of its own line.
    fn value_block(
        &mut self,
        parent: NodeId,
        min_indent: usize,
        line: usize,
        indent: usize,
        content: &str,
        entry: Entry,
    ) {
        match entry {
            Entry::Item => {
                let frame = self.open_collection(parent, line, indent, FrameKind::Sequence);
                self.item(frame, line, indent, content);
            }
            Entry::Pair { colon } => {
                let frame = self.open_collection(parent, line, indent, FrameKind::Mapping);
                self.pair(frame, line, indent, content, colon);
            }
            Entry::Scalar => self.inline_value(parent, min_indent, line, indent, content),
        }
    }

    fn open_collection(
        &mut self,
        parent: NodeId,
        line: usize,
        indent: usize,
        kind: FrameKind,
    ) -> usize {
        let node_kind = match kind {
            FrameKind::Mapping => NodeKind::Mapping,
            FrameKind::Sequence => NodeKind::Sequence,
        };
        let range = self.span(line, indent, indent + 1);
        let node = self.tree.push(parent, node_kind, range, None);
        self.frames.push(Frame::new(node, indent, kind));
        self.frames.len() - 1
    }

    fn pair(&mut self, frame: usize, line: usize, indent: usize, content: &str, colon: usize) {
        let mapping = self.frames[frame].node;
        let raw_key = content[..colon].trim_end();
        let key = unquote(raw_key);

        let range = self.span(line, indent, indent + content.len());
        let pair = self.tree.push(mapping, NodeKind::Pair, range, None);
        let key_range = self.span(line, indent, indent + raw_key.len());
        self.tree
            .push(pair, NodeKind::Key, key_range, Some(key.to_string()));
        if !self.frames[frame].keys.insert(key.to_string()) {
            self.diagnostics.push(Diagnostic::warning(
                DUPLICATE_KEY,
                key_range,
                Origin::Structure,
            ));
        }

        let rest = &content[colon + 1..];
        let value = rest.trim_start();
        if value.is_empty() {
            self.pending = Some(Pending {
                parent: pair,
                min_indent: indent + 1,
                allows_same_indent_sequence: true,
            });
            return;
        }
        let column = indent + colon + 1 + (rest.len() - value.len());
        self.inline_value(pair, indent + 1, line, column, value);
    }

    /// `- - - x` opens one sequence per indicator, walked in a loop so line
    /// length never bounds the stack.
    fn item(&mut self, frame: usize, line: usize, indent: usize, content: &str) {
        let mut sequence = self.frames[frame].node;
        let mut indent = indent;
        let mut content = content;
        loop {
            let rest = &content[1..];
            let value = rest.trim_start();
            if value.is_empty() {
                self.pending = Some(Pending {
                    parent: sequence,
                    min_indent: indent + 1,
                    allows_same_indent_sequence: false,
                });
                return;
            }

            let column = indent + 1 + (rest.len() - value.len());
            match classify(value) {
                Entry::Item => {
                    let nested = self.open_collection(sequence, line, column, FrameKind::Sequence);
                    sequence = self.frames[nested].node;
                    indent = column;
                    content = value;
                }
                Entry::Pair { colon } => {
                    let compact = self.open_collection(sequence, line, column, FrameKind::Mapping);
                    self.pair(compact, line, column, value, colon);
                    return;
                }
                Entry::Scalar => {
                    self.inline_value(sequence, indent + 1, line, column, value);
                    return;
                }
            }
        }
    }

    /// A value that follows `key:` or `-` on the same line.
    fn inline_value(
        &mut self,
        parent: NodeId,
        min_indent: usize,
        line: usize,
        column: usize,
        value: &str,
    ) {
        let mut column = column;
        let mut value = value;
        // Anchors and tags prefix the value they annotate.
        while matches!(value.as_bytes().first(), Some(b'&' | b'!')) {
            let token_end = value.find([' ', '\t']).unwrap_or(value.len());
            let rest = value[token_end..].trim_start();
            if rest.is_empty() {
                self.pending = Some(Pending {
                    parent,
                    min_indent,
                    allows_same_indent_sequence: false,
                });
                return;
            }
            column += value.len() - rest.len();
            value = rest;
        }

        let end = column + value.len();
        let range = self.span(line, column, end);

        if value.starts_with("{{") || value.starts_with("{%") {
            self.tree.push(
                parent,
                NodeKind::Scalar(ScalarStyle::Plain),
                range,
                Some(value.to_string()),
            );
            self.diagnostics.push(Diagnostic::warning(
                UNQUOTED_TEMPLATE,
                range,
                Origin::Structure,
            ));
            return;
        }

        let first = value.as_bytes()[0];
        if !matches!(first, b'[' | b'{' | b'|' | b'>') && mapping_indicator(value).is_some() {
            let marker = self.span(line, column, column + 1);
            self.diagnostics.push(Diagnostic::error(
                NESTED_COMPACT,
                marker,
                Origin::Structure,
            ));
        }

        match first {
            b'|' | b'>' => {
                let style = if first == b'|' {
                    ScalarStyle::Literal
                } else {
                    ScalarStyle::Folded
                };
                let node = self.tree.push(parent, NodeKind::Scalar(style), range, None);
                self.block = Some(Continuation { node, min_indent });
            }
            b'"' | b'\'' => {
                let style = if first == b'"' {
                    ScalarStyle::DoubleQuoted
                } else {
                    ScalarStyle::SingleQuoted
                };
                match find_closing_quote(&value[1..], first) {
                    Some(close) => {
                        let range = self.span(line, column, column + close + 2);
                        let text = value[1..=close].to_string();
                        self.tree
                            .push(parent, NodeKind::Scalar(style), range, Some(text));
                    }
                    None => {
                        let text = value[1..].to_string();
                        let node = self
                            .tree
                            .push(parent, NodeKind::Scalar(style), range, Some(text));
                        self.unclosed = Some(Unclosed::Quote { node, quote: first });
                    }
                }
            }
            b'[' | b'{' => {
                let mut stack = Vec::new();
                match close_flow(value, &mut stack) {
                    Some(close) => {
                        let range = self.span(line, column, column + close + 1);
                        let text = value[..=close].to_string();
                        self.tree.push(parent, NodeKind::Flow, range, Some(text));
                    }
                    None => {
                        let node =
                            self.tree
                                .push(parent, NodeKind::Flow, range, Some(value.to_string()));
                        self.unclosed = Some(Unclosed::Flow { node, stack });
                    }
                }
            }
            b'*' => {
                self.tree
                    .push(parent, NodeKind::Alias, range, Some(value[1..].to_string()));
            }
            _ => {
                let node = self.tree.push(
                    parent,
                    NodeKind::Scalar(ScalarStyle::Plain),
                    range,
                    Some(value.to_string()),
                );
                self.plain = Some(Continuation { node, min_indent });
            }
        }
    }

    fn continue_block(&mut self, line: usize, raw: &str) -> bool {
        let Some(block) = &self.block else {
            return false;
        };
        let content = raw.trim();
        if content.is_empty() {
            return true;
        }
        let indent = raw.len() - raw.trim_start_matches(' ').len();
        if indent >= block.min_indent {
            let node = block.node;
            let end = self.position(line, raw.len());
            self.tree.extend_to(node, end);
            self.tree.append_text(node, content, '\n');
            return true;
        }
        self.block = None;
        false
    }

    fn continue_unclosed(&mut self, line: usize, raw: &str) -> bool {
        let Some(unclosed) = self.unclosed.take() else {
            return false;
        };
        if is_marker(raw, "---") || is_marker(raw, "...") {
            self.report_unclosed(&unclosed);
            return false;
        }

        let (node, close, kept) = match unclosed {
            Unclosed::Quote { node, quote } => {
                let close = find_closing_quote(raw, quote);
                if close.is_none() {
                    self.unclosed = Some(Unclosed::Quote { node, quote });
                }
                (node, close, close.unwrap_or(raw.len()))
            }
            Unclosed::Flow { node, mut stack } => {
                let close = close_flow(raw, &mut stack);
                if close.is_none() {
                    self.unclosed = Some(Unclosed::Flow { node, stack });
                }
                (node, close, close.map_or(raw.len(), |close| close + 1))
            }
        };

        let end = self.position(line, close.map_or(raw.len(), |close| close + 1));
        self.tree.extend_to(node, end);
        self.tree.append_text(node, raw[..kept].trim(), ' ');
        true
    }

    fn report_unclosed(&mut self, unclosed: &Unclosed) {
        let (node, message) = match unclosed {
            Unclosed::Quote { node, quote } => {
                (*node, format!("Missing closing {}quote", *quote as char))
            }
            Unclosed::Flow { node, stack } => {
                let closer = match stack.last() {
                    Some(b'{') => '}',
                    _ => ']',
                };
                (*node, format!("Missing closing {closer}"))
            }
        };
        let start = self.tree.start(node);
        let range = Range::on_line(start.line, start.character, start.character + 1);
        self.diagnostics
            .push(Diagnostic::error(message, range, Origin::Structure));
    }

    fn bad_indentation(&mut self, line: usize, indent: usize, content: &str, entry: Entry) {
        let message = match entry {
            Entry::Pair { .. } => BAD_MAPPING_INDENT,
            Entry::Item => BAD_SEQUENCE_INDENT,
            Entry::Scalar => return,
        };
        let range = self.span(line, indent, indent + content.len());
        self.diagnostics
            .push(Diagnostic::error(message, range, Origin::Structure));
    }

    fn start_document(&mut self, line: usize) {
        let start = self.position(line, 0);
        let end = self.position(line, self.lines[line].trim_end().len());
        let document = self.tree.push(
            self.tree.root(),
            NodeKind::Document,
            Range::new(start, end),
            None,
        );
        self.document = Some(document);
    }

    fn end_document(&mut self) {
        if let Some(unclosed) = self.unclosed.take() {
            self.report_unclosed(&unclosed);
        }
        self.document = None;
        self.has_root = false;
        self.frames.clear();
        self.pending = None;
        self.block = None;
        self.plain = None;
    }

    fn finish(mut self, text: &str) -> (SyntaxTree, Vec<Diagnostic>) {
        self.end_document();
        let end = if text.ends_with('\n') || self.lines.is_empty() {
            Position::new(self.lines.len() as u32, 0)
        } else {
            let last = self.lines.len() - 1;
            self.position(last, self.lines[last].len())
        };
        (self.tree.finish(end), self.diagnostics)
    }

    /// Byte offset on `line` to a character position.
    fn position(&self, line: usize, byte: usize) -> Position {
        let text = self.lines.get(line).copied().unwrap_or("");
        let byte = byte.min(text.len());
        let column = text.get(..byte).map_or(byte, |prefix| prefix.chars().count());
        Position::new(line as u32, column as u32)
    }

    fn span(&self, line: usize, start: usize, end: usize) -> Range {
        Range::new(self.position(line, start), self.position(line, end))
    }
}

fn is_marker(content: &str, marker: &str) -> bool {
    content
        .strip_prefix(marker)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with([' ', '\t']))
}

fn classify(content: &str) -> Entry {
    if is_marker(content, "-") {
        Entry::Item
    } else if let Some(colon) = mapping_indicator(content) {
        Entry::Pair { colon }
    } else {
        Entry::Scalar
    }
}

/// Byte offset of the `:` that makes `content` a `key: value` entry.
fn mapping_indicator(content: &str) -> Option<usize> {
    let bytes = content.as_bytes();
    let mut i = 0;
    match bytes.first() {
        Some(&(quote @ (b'"' | b'\''))) => i = find_closing_quote(&content[1..], quote)? + 2,
        Some(b'[' | b'{') if !is_template_start(bytes) => return None,
        _ => {}
    }

    while i < bytes.len() {
        if is_template_start(&bytes[i..]) {
            let closer: &[u8] = if bytes[i + 1] == b'{' { b"}}" } else { b"%}" };
            let offset = find_subslice(&bytes[i + 2..], closer)?;
            i += offset + 4;
            continue;
        }
        if bytes[i] == b':' && matches!(bytes.get(i + 1), None | Some(b' ' | b'\t')) {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn is_template_start(bytes: &[u8]) -> bool {
    bytes.starts_with(b"{{") || bytes.starts_with(b"{%")
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Offset of the quote that closes a scalar whose opening quote precedes `text`.
fn find_closing_quote(text: &str, quote: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if quote == b'"' => i += 2,
            b'\'' if quote == b'\'' && bytes.get(i + 1) == Some(&b'\'') => i += 2,
            b if b == quote => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Offset of the bracket that balances the flow collection; `stack` carries
/// open brackets across lines.
fn close_flow(text: &str, stack: &mut Vec<u8>) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'') => match find_closing_quote(&text[i + 1..], quote) {
                Some(close) => i += close + 2,
                None => return None,
            },
            open @ (b'[' | b'{') => {
                stack.push(open);
                i += 1;
            }
            b']' | b'}' => {
                stack.pop();
                if stack.is_empty() {
                    return Some(i);
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    None
}

fn strip_comment(content: &str) -> &str {
    let bytes = content.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        match quote {
            Some(b'"') if byte == b'\\' => {
                i += 2;
                continue;
            }
            Some(open) if byte == open => quote = None,
            Some(_) => {}
            None => {
                let after_space = i == 0 || matches!(bytes[i - 1], b' ' | b'\t');
                if byte == b'#' && after_space {
                    return &content[..i];
                }
                let token_start =
                    after_space || matches!(bytes[i - 1], b':' | b'[' | b'{' | b',');
                if matches!(byte, b'"' | b'\'') && token_start {
                    quote = Some(byte);
                }
            }
        }
        i += 1;
    }
    content
}

fn unquote(key: &str) -> &str {
    let bytes = key.as_bytes();
    if bytes.len() >= 2
        && matches!(bytes[0], b'"' | b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        &key[1..key.len() - 1]
    } else {
        key
    }
}
