//! Per-document diagnostic pipeline.
//!
//! Every open or change creates a run with a fresh id. A run waits out the
//! debounce delay, parses in-process, runs one external source, and publishes
//! structural plus external diagnostics together. Starting a run supersedes
//! the previous one for the same document: its token is cancelled, its task is
//! aborted (killing any child process), and anything it still produces is
//! dropped by the run-id check in [`Shared::finish`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use drover_config::{ConfigScope, Settings, SettingsPatch};
use drover_parser::SyntaxTree;
use drover_types::{Diagnostic, DocumentUri, Origin, Range, uri_to_path};
use drover_workspace::WorkspaceManager;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::publisher::DiagnosticsPublisher;
use crate::validator::{ExternalValidator, SourceError, ValidationRequest};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Lifecycle of the latest run for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Scheduled,
    Running,
    Completed,
    Superseded,
    Cancelled,
    Failed,
}

impl RunState {
    fn is_active(self) -> bool {
        matches!(self, RunState::Scheduled | RunState::Running)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Quiet period after the last edit before a run starts.
    pub debounce: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

struct DocumentSlot {
    text: Arc<str>,
    version: i32,
    run: u64,
    state: RunState,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    last_published: Option<i32>,
    tree: Option<Arc<SyntaxTree>>,
}

impl DocumentSlot {
    fn new(text: Arc<str>, version: i32) -> Self {
        Self {
            text,
            version,
            run: 0,
            state: RunState::Idle,
            cancel: CancellationToken::new(),
            task: None,
            last_published: None,
            tree: None,
        }
    }

    /// Stop the current run, if any, and record how it ended.
    fn stop(&mut self, outcome: RunState) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.state.is_active() {
            self.state = outcome;
        }
    }
}

struct Shared {
    documents: Mutex<HashMap<DocumentUri, DocumentSlot>>,
    next_run: AtomicU64,
    workspaces: Arc<WorkspaceManager>,
    validator: Arc<dyn ExternalValidator>,
    publisher: Arc<dyn DiagnosticsPublisher>,
    config: CoordinatorConfig,
}

impl Shared {
    fn documents(&self) -> MutexGuard<'_, HashMap<DocumentUri, DocumentSlot>> {
        self.documents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move run `run` to `Running` if it is still the document's current run.
    fn start(&self, uri: &DocumentUri, run: u64) -> bool {
        let mut documents = self.documents();
        match documents.get_mut(uri) {
            Some(slot) if slot.run == run => {
                slot.state = RunState::Running;
                true
            }
            _ => false,
        }
    }

    fn store_tree(&self, uri: &DocumentUri, run: u64, tree: Arc<SyntaxTree>) {
        let mut documents = self.documents();
        if let Some(slot) = documents.get_mut(uri)
            && slot.run == run
        {
            slot.tree = Some(tree);
        }
    }

    /// Publish the outcome of `run` unless a newer run or version took over.
    fn finish(
        &self,
        uri: &DocumentUri,
        run: u64,
        version: i32,
        state: RunState,
        diagnostics: Vec<Diagnostic>,
    ) {
        let mut documents = self.documents();
        let Some(slot) = documents.get_mut(uri) else {
            tracing::debug!(uri = %uri, run, "Document closed before run finished");
            return;
        };
        if slot.run != run {
            tracing::debug!(uri = %uri, run, current = slot.run, "Dropping superseded run");
            return;
        }
        slot.task = None;
        if slot.last_published.is_some_and(|published| published > version) {
            slot.state = RunState::Superseded;
            tracing::debug!(uri = %uri, version, "Dropping results for an older version");
            return;
        }

        tracing::debug!(
            uri = %uri,
            version,
            run,
            count = diagnostics.len(),
            state = ?state,
            "Publishing diagnostics"
        );
        self.publisher.publish(uri, version, diagnostics);
        slot.last_published = Some(version);
        slot.state = state;
    }
}

/// Schedules, supersedes, and publishes validation runs.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DiagnosticCoordinator {
    shared: Arc<Shared>,
}

impl DiagnosticCoordinator {
    pub fn new(
        workspaces: Arc<WorkspaceManager>,
        validator: Arc<dyn ExternalValidator>,
        publisher: Arc<dyn DiagnosticsPublisher>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                documents: Mutex::new(HashMap::new()),
                next_run: AtomicU64::new(1),
                workspaces,
                validator,
                publisher,
                config,
            }),
        }
    }

    /// Record new text for `uri` and schedule a run for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, uri: DocumentUri, text: impl Into<Arc<str>>, version: i32) {
        let text = text.into();
        let settings = self.shared.workspaces.settings_for(&uri);

        let mut documents = self.shared.documents();
        let slot = documents
            .entry(uri.clone())
            .or_insert_with(|| DocumentSlot::new(Arc::clone(&text), version));
        slot.text = Arc::clone(&text);
        slot.version = version;

        if !settings.validation.enabled {
            slot.stop(RunState::Cancelled);
            if slot.last_published.is_some_and(|published| published > version) {
                return;
            }
            tracing::debug!(uri = %uri, version, "Validation disabled; clearing diagnostics");
            self.shared.publisher.publish(&uri, version, Vec::new());
            slot.last_published = Some(version);
            return;
        }

        slot.stop(RunState::Superseded);
        let run = self.shared.next_run.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        slot.run = run;
        slot.state = RunState::Scheduled;
        slot.cancel = cancel.clone();
        slot.task = Some(tokio::spawn(execute(
            Arc::clone(&self.shared),
            uri.clone(),
            run,
            version,
            text,
            settings,
            cancel,
        )));
        tracing::debug!(uri = %uri, version, run, "Scheduled validation");
    }

    /// Stop any run for `uri` and forget it. Nothing is published.
    pub fn close(&self, uri: &DocumentUri) {
        let (removed, open) = {
            let mut documents = self.shared.documents();
            let removed = documents.remove(uri);
            (removed, documents.keys().cloned().collect::<Vec<_>>())
        };
        if let Some(mut slot) = removed {
            slot.stop(RunState::Cancelled);
            tracing::debug!(uri = %uri, "Closed document");
        }
        self.shared.workspaces.release_document(uri, &open);
    }

    /// Apply a configuration change and re-run every open document it affects.
    pub fn reconfigure(&self, scope: ConfigScope, patch: &SettingsPatch) {
        let scope = self.shared.workspaces.apply_configuration(scope, patch);
        let affected: Vec<(DocumentUri, Arc<str>, i32)> = self
            .shared
            .documents()
            .iter()
            .filter(|(uri, _)| self.shared.workspaces.affects(&scope, uri))
            .map(|(uri, slot)| (uri.clone(), Arc::clone(&slot.text), slot.version))
            .collect();

        tracing::debug!(scope = ?scope, documents = affected.len(), "Configuration changed");
        for (uri, text, version) in affected {
            self.schedule(uri, text, version);
        }
    }

    #[must_use]
    pub fn run_state(&self, uri: &DocumentUri) -> RunState {
        self.shared
            .documents()
            .get(uri)
            .map_or(RunState::Idle, |slot| slot.state)
    }

    /// Tree from the latest run that got as far as parsing.
    #[must_use]
    pub fn latest_structural_tree(&self, uri: &DocumentUri) -> Option<Arc<SyntaxTree>> {
        self.shared
            .documents()
            .get(uri)
            .and_then(|slot| slot.tree.clone())
    }

    #[must_use]
    pub fn open_documents(&self) -> Vec<DocumentUri> {
        let mut uris: Vec<_> = self.shared.documents().keys().cloned().collect();
        uris.sort();
        uris
    }

    /// Cancel every run. Documents stay open.
    pub fn shutdown(&self) {
        for slot in self.shared.documents().values_mut() {
            slot.stop(RunState::Cancelled);
        }
    }
}

async fn execute(
    shared: Arc<Shared>,
    uri: DocumentUri,
    run: u64,
    version: i32,
    text: Arc<str>,
    settings: Arc<Settings>,
    cancel: CancellationToken,
) {
    tokio::select! {
        () = cancel.cancelled() => return,
        () = tokio::time::sleep(shared.config.debounce) => {}
    }
    if !shared.start(&uri, run) {
        return;
    }

    let outcome = drover_parser::parse(&text);
    shared.store_tree(&uri, run, Arc::new(outcome.tree));
    let mut diagnostics = outcome.diagnostics;

    let Some(document) = uri_to_path(&uri) else {
        tracing::debug!(uri = %uri, "Not a file; structural diagnostics only");
        shared.finish(&uri, run, version, RunState::Completed, diagnostics);
        return;
    };
    let root = shared.workspaces.context_for(&uri).root_path();
    let request = ValidationRequest {
        document: &document,
        settings: &settings,
        root: root.as_deref(),
    };

    let state = match shared.validator.validate(request, &cancel).await {
        Ok(external) => {
            diagnostics.extend(external);
            RunState::Completed
        }
        Err(SourceError::Cancelled) => return,
        Err(SourceError::Environment(e)) => {
            tracing::warn!(uri = %uri, error = %e, "Environment resolution failed");
            diagnostics.push(Diagnostic::error(
                e.to_string(),
                Range::full_line(0),
                Origin::Environment,
            ));
            RunState::Failed
        }
        Err(e) => {
            tracing::warn!(uri = %uri, error = %e, "External validation failed");
            diagnostics.push(Diagnostic::warning(
                e.to_string(),
                Range::full_line(0),
                e.origin(),
            ));
            RunState::Completed
        }
    };

    shared.finish(&uri, run, version, state, diagnostics);
}
