//! `ansible-playbook --syntax-check` adapter.
//!
//! The playbook tool signals problems with a non-zero exit and a free-form
//! error block on stderr:
//!
//! ```text
//! ERROR! Syntax Error while loading YAML.
//!   mapping values are not allowed in this context
//!
//! The error appears to be in '/srv/site.yml': line 7, column 19, but may
//! be elsewhere in the file depending on the exact syntax problem.
//! ```
//!
//! Newer releases print `[ERROR]: ...` followed by `Origin: <path>:<line>:<col>`.

use std::path::Path;
use std::sync::OnceLock;

use drover_config::Settings;
use drover_process::ProcessOutput;
use drover_types::{Diagnostic, Origin, Range};
use regex::Regex;

use crate::{Invocation, ToolAdapter};

struct Patterns {
    error_start: Regex,
    line_reference: Regex,
    origin_reference: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        error_start: Regex::new(r"(?m)^(?:ERROR!|\[ERROR\]:)[ \t]*")
            .expect("valid error start regex"),
        line_reference: Regex::new(r"(?:in '([^']+)': )?line (\d+), column (\d+)")
            .expect("valid line reference regex"),
        origin_reference: Regex::new(r"(?m)^Origin: (.*):(\d+):(\d+)\s*$")
            .expect("valid origin reference regex"),
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SyntaxCheckAdapter;

impl SyntaxCheckAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ToolAdapter for SyntaxCheckAdapter {
    fn name(&self) -> &'static str {
        "ansible-playbook"
    }

    fn origin(&self) -> Origin {
        Origin::SyntaxCheck
    }

    fn build_invocation(&self, settings: &Settings, document: &Path) -> Invocation {
        Invocation {
            executable: settings.ansible.playbook_command(),
            args: vec![
                "--syntax-check".to_string(),
                document.to_string_lossy().into_owned(),
            ],
        }
    }

    fn parse_output(&self, output: &ProcessOutput, document: &Path) -> Vec<Diagnostic> {
        let patterns = patterns();
        let Some(start) = patterns.error_start.find(&output.stderr) else {
            if !output.success() {
                tracing::debug!(
                    exit_code = ?output.exit_code,
                    "Syntax check failed without an error block"
                );
            }
            return Vec::new();
        };

        let block = &output.stderr[start.end()..];
        let message = first_paragraph(block);
        let line = referenced_line(patterns, block, document).unwrap_or(0);

        vec![Diagnostic::error(
            message,
            Range::full_line(line),
            Origin::SyntaxCheck,
        )]
    }
}

/// Lines up to the first blank line or `Origin:` line, joined with spaces.
fn first_paragraph(block: &str) -> String {
    block
        .lines()
        .map(str::trim)
        .take_while(|line| !line.is_empty() && !line.starts_with("Origin:"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Zero-based line number referenced by the error block, when the reference
/// points into `document` (an included file's line means nothing here).
fn referenced_line(patterns: &Patterns, block: &str, document: &Path) -> Option<u32> {
    let captures = patterns
        .line_reference
        .captures(block)
        .or_else(|| patterns.origin_reference.captures(block))?;
    if let Some(path) = captures.get(1).map(|m| Path::new(m.as_str()))
        && !names_document(path, document)
    {
        tracing::debug!(path = %path.display(), "Syntax error is in another file");
        return None;
    }
    let line: u32 = captures.get(2)?.as_str().parse().ok()?;
    Some(line.saturating_sub(1))
}

fn names_document(path: &Path, document: &Path) -> bool {
    if path.is_absolute() {
        path == document
    } else {
        document.ends_with(path)
    }
}
