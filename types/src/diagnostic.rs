//! Diagnostic value objects shared by every analysis source.

use std::fmt::Write as _;

use serde::Serialize;

use crate::Range;

/// Severity level for a diagnostic. Discriminants match LSP numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// The analysis source a diagnostic came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Origin {
    /// In-process YAML structure checks.
    Structure,
    /// The lint tool.
    Lint,
    /// The syntax-checking interpreter.
    SyntaxCheck,
    /// Synthetic diagnostics describing a broken runtime environment.
    Environment,
}

impl Origin {
    /// Tag shown to the user next to the message.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Structure => "Ansible [YAML]",
            Self::Lint => "ansible-lint",
            Self::SyntaxCheck => "Ansible",
            Self::Environment => "Ansible [environment]",
        }
    }
}

/// A single diagnostic attached to a document.
///
/// Fields are private; the constructor is the single construction path and
/// values never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    severity: DiagnosticSeverity,
    message: String,
    range: Range,
    origin: Origin,
    /// Rule identifier reported by the source (e.g. `yaml[truthy]`).
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    /// Documentation link for `code`.
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(
        severity: DiagnosticSeverity,
        message: impl Into<String>,
        range: Range,
        origin: Origin,
    ) -> Self {
        Self {
            severity,
            message: message.into(),
            range,
            origin,
            code: None,
            url: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>, range: Range, origin: Origin) -> Self {
        Self::new(DiagnosticSeverity::Error, message, range, origin)
    }

    #[must_use]
    pub fn warning(message: impl Into<String>, range: Range, origin: Origin) -> Self {
        Self::new(DiagnosticSeverity::Warning, message, range, origin)
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    #[must_use]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Format as `path:line:col: severity: [origin] message` (1-indexed for display).
    #[must_use]
    pub fn display_with_path(&self, path: &std::path::Path) -> String {
        let mut out = format!(
            "{}:{}:{}: {}: [{}] {}",
            path.display(),
            self.range.start.line + 1,
            self.range.start.character.saturating_add(1),
            self.severity.label(),
            self.origin.label(),
            self.message,
        );
        if let Some(code) = &self.code {
            let _ = write!(out, " ({code})");
        }
        out
    }
}
