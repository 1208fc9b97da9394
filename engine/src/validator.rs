//! External analysis sources.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use drover_adapters::{LintAdapter, SyntaxCheckAdapter, ToolAdapter};
use drover_config::Settings;
use drover_process::{
    EnvironmentResolutionError, EnvironmentResolver, ProcessError, ProcessRequest, ProcessRunner,
};
use drover_types::{Diagnostic, EnvOverlay, Origin};
use tokio_util::sync::CancellationToken;

/// Validation future type alias.
pub type ValidatorFut<'a> = Pin<Box<dyn Future<Output = Result<Vec<Diagnostic>, SourceError>> + Send + 'a>>;

/// Why an external source produced no diagnostics of its own.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Environment(#[from] EnvironmentResolutionError),
    #[error("{source_name} could not be started: {detail}")]
    Spawn {
        source_name: &'static str,
        origin: Origin,
        detail: String,
    },
    #[error("{source_name} timed out after {}s", timeout.as_secs())]
    Timeout {
        source_name: &'static str,
        origin: Origin,
        timeout: Duration,
    },
    #[error("validation was cancelled")]
    Cancelled,
}

impl SourceError {
    /// Origin for the synthetic diagnostic reporting this error.
    #[must_use]
    pub fn origin(&self) -> Origin {
        match self {
            SourceError::Environment(_) | SourceError::Cancelled => Origin::Environment,
            SourceError::Spawn { origin, .. } | SourceError::Timeout { origin, .. } => *origin,
        }
    }
}

/// One external validation of a saved document.
#[derive(Debug, Clone, Copy)]
pub struct ValidationRequest<'a> {
    pub document: &'a Path,
    pub settings: &'a Settings,
    /// Working directory for the tool, normally the workspace root.
    pub root: Option<&'a Path>,
}

pub trait ExternalValidator: Send + Sync {
    fn validate<'a>(
        &'a self,
        request: ValidationRequest<'a>,
        cancel: &'a CancellationToken,
    ) -> ValidatorFut<'a>;
}

/// Runs `ansible-lint` when it is enabled and installed, otherwise
/// `ansible-playbook --syntax-check`. With an execution environment enabled
/// the tool runs inside the configured container image instead.
#[derive(Debug, Clone, Default)]
pub struct ToolchainValidator {
    runner: ProcessRunner,
    resolver: EnvironmentResolver,
    lint: LintAdapter,
    syntax_check: SyntaxCheckAdapter,
}

impl ToolchainValidator {
    #[must_use]
    pub fn new(runner: ProcessRunner, resolver: EnvironmentResolver) -> Self {
        Self {
            runner,
            resolver,
            lint: LintAdapter::new(),
            syntax_check: SyntaxCheckAdapter::new(),
        }
    }

    async fn run(
        &self,
        request: ValidationRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Diagnostic>, SourceError> {
        let settings = request.settings;
        if settings.execution_environment.enabled {
            return self.run_in_container(request, cancel).await;
        }

        let env = match self.resolver.resolve(settings, cancel).await {
            Ok(env) => env,
            Err(EnvironmentResolutionError::Cancelled) => return Err(SourceError::Cancelled),
            Err(e) => return Err(e.into()),
        };

        let adapter: &dyn ToolAdapter = if settings.lint_requested() {
            if env.locate(&settings.validation.lint.path).is_some() {
                &self.lint
            } else {
                tracing::debug!(
                    lint = %settings.validation.lint.path,
                    "Lint tool not found; falling back to syntax check"
                );
                &self.syntax_check
            }
        } else {
            &self.syntax_check
        };

        let process_request = adapter
            .build_invocation(settings, request.document)
            .into_request(
                env.overlay().clone(),
                settings.execution.timeout,
                request.root.map(Path::to_path_buf),
            );
        self.execute(adapter, &process_request, request.document, cancel)
            .await
    }

    /// The image is expected to ship the lint tool, so lint runs whenever it
    /// is requested.
    async fn run_in_container(
        &self,
        request: ValidationRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Diagnostic>, SourceError> {
        let settings = request.settings;
        let runtime = self.resolver.resolve_container(settings)?;
        let adapter: &dyn ToolAdapter = if settings.lint_requested() {
            &self.lint
        } else {
            &self.syntax_check
        };

        let mut mounts: Vec<&Path> = request.root.into_iter().collect();
        if let Some(dir) = request.document.parent() {
            mounts.push(dir);
        }
        let process_request = runtime.wrap(
            adapter.build_invocation(settings, request.document).into_request(
                EnvOverlay::new(),
                settings.execution.timeout,
                request.root.map(Path::to_path_buf),
            ),
            &mounts,
        );
        self.execute(adapter, &process_request, request.document, cancel)
            .await
    }

    async fn execute(
        &self,
        adapter: &dyn ToolAdapter,
        process_request: &ProcessRequest,
        document: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<Diagnostic>, SourceError> {
        tracing::debug!(
            tool = adapter.name(),
            document = %document.display(),
            "Running external validator"
        );

        let output = match self.runner.run(process_request, cancel).await {
            Ok(output) | Err(ProcessError::NonZeroExit { output, .. }) => output,
            Err(ProcessError::Cancelled { .. }) => return Err(SourceError::Cancelled),
            Err(ProcessError::Timeout { timeout, .. }) => {
                return Err(SourceError::Timeout {
                    source_name: adapter.name(),
                    origin: adapter.origin(),
                    timeout,
                });
            }
            Err(ProcessError::Spawn { source, .. }) => {
                return Err(SourceError::Spawn {
                    source_name: adapter.name(),
                    origin: adapter.origin(),
                    detail: source.to_string(),
                });
            }
        };

        if output.stdout_truncated || output.stderr_truncated {
            tracing::warn!(tool = adapter.name(), "Tool output was truncated");
        }
        Ok(adapter.parse_output(&output, document))
    }
}

impl ExternalValidator for ToolchainValidator {
    fn validate<'a>(
        &'a self,
        request: ValidationRequest<'a>,
        cancel: &'a CancellationToken,
    ) -> ValidatorFut<'a> {
        Box::pin(self.run(request, cancel))
    }
}
