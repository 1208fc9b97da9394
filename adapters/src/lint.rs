//! `ansible-lint` adapter (codeclimate JSON output).

use std::path::Path;

use drover_config::Settings;
use drover_process::ProcessOutput;
use drover_types::{Diagnostic, DiagnosticSeverity, LINE_END, Origin, Range};
use serde::Deserialize;

use crate::{Invocation, ToolAdapter};

/// Flags appended after user arguments; output parsing depends on them.
const OUTPUT_FLAGS: &[&str] = &["--offline", "--nocolor", "-f", "codeclimate"];

#[derive(Debug, Default, Deserialize)]
struct Issue {
    #[serde(default)]
    check_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    location: Option<IssueLocation>,
}

#[derive(Debug, Default, Deserialize)]
struct IssueLocation {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    positions: Option<Positions>,
    #[serde(default)]
    lines: Option<Lines>,
}

#[derive(Debug, Default, Deserialize)]
struct Positions {
    #[serde(default)]
    begin: Option<Point>,
}

#[derive(Debug, Default, Deserialize)]
struct Point {
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    column: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct Lines {
    #[serde(default)]
    begin: Option<u32>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LintAdapter;

impl LintAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ToolAdapter for LintAdapter {
    fn name(&self) -> &'static str {
        "ansible-lint"
    }

    fn origin(&self) -> Origin {
        Origin::Lint
    }

    fn build_invocation(&self, settings: &Settings, document: &Path) -> Invocation {
        let lint = &settings.validation.lint;
        let mut args = lint.arguments.clone();
        args.extend(OUTPUT_FLAGS.iter().map(|flag| (*flag).to_string()));
        args.push(document.to_string_lossy().into_owned());
        Invocation {
            executable: lint.path.clone(),
            args,
        }
    }

    fn parse_output(&self, output: &ProcessOutput, document: &Path) -> Vec<Diagnostic> {
        let stdout = output.stdout.trim();
        if stdout.is_empty() {
            if !output.success() {
                tracing::warn!(
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "ansible-lint failed without a report; no lint diagnostics"
                );
            }
            return Vec::new();
        }

        let items: Vec<serde_json::Value> = match serde_json::from_str(stdout) {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    exit_code = ?output.exit_code,
                    "Unparseable ansible-lint output; no lint diagnostics"
                );
                return Vec::new();
            }
        };

        items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<Issue>(item) {
                Ok(issue) => Some(issue),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed ansible-lint issue");
                    None
                }
            })
            .filter(|issue| refers_to(issue, document))
            .map(to_diagnostic)
            .collect()
    }
}

fn refers_to(issue: &Issue, document: &Path) -> bool {
    let Some(path) = issue.location.as_ref().and_then(|l| l.path.as_deref()) else {
        return true;
    };
    let path = Path::new(path);
    if path.is_absolute() {
        path == document
    } else {
        document.ends_with(path)
    }
}

fn to_diagnostic(issue: Issue) -> Diagnostic {
    let severity = issue
        .level
        .as_deref()
        .and_then(level_severity)
        .or_else(|| issue.severity.as_deref().map(codeclimate_severity))
        .unwrap_or(DiagnosticSeverity::Warning);

    let location = issue.location.unwrap_or_default();
    let begin = location.positions.and_then(|p| p.begin);
    let (line, column) = match begin {
        Some(Point {
            line: Some(line),
            column,
        }) => (line, column.unwrap_or(1)),
        _ => (location.lines.and_then(|l| l.begin).unwrap_or(1), 1),
    };
    let range = Range::on_line(line.saturating_sub(1), column.saturating_sub(1), LINE_END);

    let message = issue
        .description
        .filter(|d| !d.trim().is_empty())
        .or_else(|| issue.check_name.clone())
        .unwrap_or_else(|| "ansible-lint issue".to_string());

    let mut diagnostic = Diagnostic::new(severity, message, range, Origin::Lint);
    if let Some(code) = issue.check_name {
        diagnostic = diagnostic.with_code(code);
    }
    if let Some(url) = issue.url {
        diagnostic = diagnostic.with_url(url);
    }
    diagnostic
}

fn level_severity(level: &str) -> Option<DiagnosticSeverity> {
    match level {
        "error" => Some(DiagnosticSeverity::Error),
        "warning" => Some(DiagnosticSeverity::Warning),
        _ => None,
    }
}

fn codeclimate_severity(severity: &str) -> DiagnosticSeverity {
    match severity {
        "blocker" | "critical" | "major" => DiagnosticSeverity::Error,
        "minor" => DiagnosticSeverity::Warning,
        _ => DiagnosticSeverity::Information,
    }
}
