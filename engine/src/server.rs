//! Transport-facing entry points.
//!
//! The transport layer (stdio framing, JSON-RPC) lives elsewhere; it decodes
//! notifications and calls these methods, and receives diagnostics through
//! the [`DiagnosticsPublisher`] it supplied.

use std::sync::Arc;

use drover_config::{ConfigScope, SettingsPatch};
use drover_parser::SyntaxTree;
use drover_process::{EnvironmentResolver, ProcessRunner};
use drover_types::DocumentUri;
use drover_workspace::{WorkspaceManager, WorkspaceMetadata, probe_metadata};
use tokio_util::sync::CancellationToken;

use crate::coordinator::{CoordinatorConfig, DiagnosticCoordinator, RunState};
use crate::publisher::DiagnosticsPublisher;
use crate::validator::ToolchainValidator;

pub struct LanguageServer {
    workspaces: Arc<WorkspaceManager>,
    coordinator: DiagnosticCoordinator,
    runner: ProcessRunner,
    resolver: EnvironmentResolver,
    shutdown: CancellationToken,
}

impl LanguageServer {
    /// Server with the production toolchain and the process environment.
    pub fn new(global: SettingsPatch, publisher: Arc<dyn DiagnosticsPublisher>) -> Self {
        Self::with_resolver(
            global,
            publisher,
            EnvironmentResolver::default(),
            CoordinatorConfig::default(),
        )
    }

    pub fn with_resolver(
        global: SettingsPatch,
        publisher: Arc<dyn DiagnosticsPublisher>,
        resolver: EnvironmentResolver,
        config: CoordinatorConfig,
    ) -> Self {
        let runner = ProcessRunner::new();
        let workspaces = Arc::new(WorkspaceManager::new(global));
        let validator = Arc::new(ToolchainValidator::new(runner.clone(), resolver.clone()));
        let coordinator =
            DiagnosticCoordinator::new(Arc::clone(&workspaces), validator, publisher, config);
        Self {
            workspaces,
            coordinator,
            runner,
            resolver,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn on_document_open(&self, uri: DocumentUri, text: impl Into<Arc<str>>, version: i32) {
        tracing::debug!(uri = %uri, version, "Document opened");
        let context = self.workspaces.context_for(&uri);
        if self.workspaces.settings_for(&uri).validation.enabled && context.claim_metadata_probe() {
            self.spawn_metadata_probe(uri.clone());
        }
        self.coordinator.schedule(uri, text, version);
    }

    pub fn on_document_change(&self, uri: DocumentUri, text: impl Into<Arc<str>>, version: i32) {
        self.coordinator.schedule(uri, text, version);
    }

    pub fn on_document_close(&self, uri: &DocumentUri) {
        self.coordinator.close(uri);
    }

    pub fn on_configuration_change(&self, scope: ConfigScope, patch: &SettingsPatch) {
        self.coordinator.reconfigure(scope, patch);
    }

    pub fn add_workspace_root(&self, root: &DocumentUri) {
        self.workspaces.add_root(root);
    }

    pub fn remove_workspace_root(&self, root: &DocumentUri) {
        self.workspaces.remove_root(root);
    }

    #[must_use]
    pub fn latest_structural_tree(&self, uri: &DocumentUri) -> Option<Arc<SyntaxTree>> {
        self.coordinator.latest_structural_tree(uri)
    }

    #[must_use]
    pub fn run_state(&self, uri: &DocumentUri) -> RunState {
        self.coordinator.run_state(uri)
    }

    /// Last probed metadata for the workspace owning `uri`.
    #[must_use]
    pub fn workspace_metadata(&self, uri: &DocumentUri) -> Arc<WorkspaceMetadata> {
        self.workspaces.context_for(uri).metadata().snapshot()
    }

    /// Re-probe the toolchain for the workspace owning `uri`.
    ///
    /// An unresolvable environment leaves the previous snapshot in place.
    pub async fn refresh_metadata(&self, uri: &DocumentUri) -> Arc<WorkspaceMetadata> {
        refresh(
            &self.workspaces,
            &self.resolver,
            &self.runner,
            uri,
            &self.shutdown,
        )
        .await
    }

    /// Cancel every in-flight run and probe.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.coordinator.shutdown();
    }

    fn spawn_metadata_probe(&self, uri: DocumentUri) {
        let workspaces = Arc::clone(&self.workspaces);
        let resolver = self.resolver.clone();
        let runner = self.runner.clone();
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            refresh(&workspaces, &resolver, &runner, &uri, &cancel).await;
        });
    }
}

async fn refresh(
    workspaces: &WorkspaceManager,
    resolver: &EnvironmentResolver,
    runner: &ProcessRunner,
    uri: &DocumentUri,
    cancel: &CancellationToken,
) -> Arc<WorkspaceMetadata> {
    let context = workspaces.context_for(uri);
    let settings = workspaces.settings_for(uri);
    if settings.execution_environment.enabled {
        tracing::debug!(root = %context.root(), "Metadata is not collected inside an execution environment");
        return context.metadata().snapshot();
    }
    match resolver.resolve(&settings, cancel).await {
        Ok(env) => {
            let metadata = probe_metadata(runner, &env, &settings, cancel).await;
            if !cancel.is_cancelled() {
                context.metadata().replace(metadata);
            }
        }
        Err(e) => {
            tracing::warn!(root = %context.root(), error = %e, "Skipping metadata probe");
        }
    }
    context.metadata().snapshot()
}
