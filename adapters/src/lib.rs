//! Tool adapters: one per external analysis source.
//!
//! An adapter knows how to invoke its tool for a document and how to turn
//! the captured output into diagnostics. Adapters never run processes
//! themselves; the caller owns execution, timeouts, and cancellation.

mod lint;
mod syntax_check;

pub use lint::LintAdapter;
pub use syntax_check::SyntaxCheckAdapter;

use std::path::{Path, PathBuf};
use std::time::Duration;

use drover_config::Settings;
use drover_process::{ProcessOutput, ProcessRequest};
use drover_types::{Diagnostic, EnvOverlay, Origin};

/// Command line for one tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub executable: String,
    pub args: Vec<String>,
}

impl Invocation {
    #[must_use]
    pub fn into_request(
        self,
        env: EnvOverlay,
        timeout: Duration,
        working_dir: Option<PathBuf>,
    ) -> ProcessRequest {
        let mut request = ProcessRequest::new(self.executable, timeout)
            .args(self.args)
            .env(env);
        request.working_dir = working_dir;
        request
    }
}

pub trait ToolAdapter: Send + Sync {
    /// Short name used in logs and synthetic diagnostics.
    fn name(&self) -> &'static str;

    fn origin(&self) -> Origin;

    fn build_invocation(&self, settings: &Settings, document: &Path) -> Invocation;

    /// Translate captured output into diagnostics for `document`.
    ///
    /// Called for successful runs and for non-zero exits alike.
    fn parse_output(&self, output: &ProcessOutput, document: &Path) -> Vec<Diagnostic>;
}
