//! Core domain types for Drover.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the server.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod diagnostic;
mod env;

pub use diagnostic::{Diagnostic, DiagnosticSeverity, Origin};
pub use env::{COLOR_OVERRIDES, EnvOverlay, with_color_overrides};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Document identity as delivered by the transport.
pub use url::Url as DocumentUri;

// ============================================================================
// Source positions
// ============================================================================

/// Sentinel end column meaning "to the end of the line".
///
/// Editors clamp it to the actual line length.
pub const LINE_END: u32 = u32::MAX;

/// A zero-based line/column position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// A span in a document, `start` to `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Span on a single line between two columns.
    #[must_use]
    pub const fn on_line(line: u32, start: u32, end: u32) -> Self {
        Self {
            start: Position::new(line, start),
            end: Position::new(line, end),
        }
    }

    /// Span covering the whole of `line`.
    #[must_use]
    pub const fn full_line(line: u32) -> Self {
        Self::on_line(line, 0, LINE_END)
    }

    /// Whether `position` lies inside this range (end inclusive, so a cursor
    /// sitting right after the last character still counts).
    #[must_use]
    pub fn contains(&self, position: Position) -> bool {
        self.start <= position && position <= self.end
    }

    /// Whether the range spans the full line it starts on.
    #[must_use]
    pub fn is_full_line(&self) -> bool {
        self.start.character == 0
            && self.end.character == LINE_END
            && self.start.line == self.end.line
    }
}

/// Convert a `file://` document URI into a local path.
///
/// Returns `None` for other schemes (untitled buffers, remote documents).
#[must_use]
pub fn uri_to_path(uri: &DocumentUri) -> Option<PathBuf> {
    if uri.scheme() != "file" {
        return None;
    }
    uri.to_file_path().ok()
}
