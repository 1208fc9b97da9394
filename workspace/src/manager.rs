//! Routing documents to workspace contexts.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use drover_config::{ConfigScope, Settings, SettingsPatch, workspace_config_path};
use drover_types::{DocumentUri, uri_to_path};

use crate::context::{WorkspaceContext, directory_uri};

#[derive(Debug, Default)]
struct ManagerState {
    /// Roots the client registered, with trailing `/`.
    registered: HashSet<DocumentUri>,
    /// Keyed by root; includes implicit per-directory contexts.
    contexts: HashMap<DocumentUri, Arc<WorkspaceContext>>,
}

/// Owns every [`WorkspaceContext`] and the global settings layer.
///
/// A document belongs to the registered root with the longest matching
/// prefix. Documents outside every root get an implicit context rooted at
/// their parent directory.
#[derive(Debug, Default)]
pub struct WorkspaceManager {
    global: RwLock<SettingsPatch>,
    state: RwLock<ManagerState>,
}

impl WorkspaceManager {
    #[must_use]
    pub fn new(global: SettingsPatch) -> Self {
        Self {
            global: RwLock::new(global),
            state: RwLock::new(ManagerState::default()),
        }
    }

    #[must_use]
    pub fn global_patch(&self) -> SettingsPatch {
        self.global
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn add_root(&self, root: &DocumentUri) {
        let root = directory_uri(root);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.registered.insert(root.clone()) {
            return;
        }
        // Implicit contexts below the new root are now owned by it.
        let registered = &state.registered;
        let stale: Vec<DocumentUri> = state
            .contexts
            .keys()
            .filter(|key| {
                *key != &root && !registered.contains(*key) && key.as_str().starts_with(root.as_str())
            })
            .cloned()
            .collect();
        for key in &stale {
            state.contexts.remove(key);
        }
        tracing::info!(root = %root, dropped = stale.len(), "Added workspace root");
    }

    /// Forget a root and its context. Returns whether it was registered.
    pub fn remove_root(&self, root: &DocumentUri) -> bool {
        let root = directory_uri(root);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let removed = state.registered.remove(&root);
        state.contexts.remove(&root);
        if removed {
            tracing::info!(root = %root, "Removed workspace root");
        }
        removed
    }

    #[must_use]
    pub fn roots(&self) -> Vec<DocumentUri> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut roots: Vec<_> = state.registered.iter().cloned().collect();
        roots.sort();
        roots
    }

    /// The context owning `uri`, created on first use.
    pub fn context_for(&self, uri: &DocumentUri) -> Arc<WorkspaceContext> {
        let root = self.owning_root(uri);
        if let Some(context) = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contexts
            .get(&root)
        {
            return Arc::clone(context);
        }

        let created = Arc::new(WorkspaceContext::new(&root, load_workspace_patch(&root)));
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let context = state.contexts.entry(root).or_insert_with(|| {
            tracing::debug!(root = %created.root(), "Created workspace context");
            Arc::clone(&created)
        });
        Arc::clone(context)
    }

    /// The context owning `uri`, if one exists already.
    #[must_use]
    pub fn existing_context(&self, uri: &DocumentUri) -> Option<Arc<WorkspaceContext>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.contexts.get(&owning_root_in(&state, uri)).cloned()
    }

    /// Forget `uri`'s document layer after it was closed.
    ///
    /// An implicit context is dropped once none of the `open` documents
    /// belong to it; contexts of registered roots live until the root is
    /// removed.
    pub fn release_document(&self, uri: &DocumentUri, open: &[DocumentUri]) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let root = owning_root_in(&state, uri);
        let Some(context) = state.contexts.get(&root) else {
            return;
        };
        context.forget_document(uri);

        let in_use = state.registered.contains(&root)
            || open.iter().any(|other| owning_root_in(&state, other) == root);
        if !in_use {
            state.contexts.remove(&root);
            tracing::debug!(root = %root, "Dropped unused workspace context");
        }
    }

    pub fn settings_for(&self, uri: &DocumentUri) -> Arc<Settings> {
        let global = self.global_patch();
        self.context_for(uri).settings_for(uri, &global)
    }

    /// Merge `patch` into the layer named by `scope` and invalidate the
    /// settings it shadows. Returns the scope that changed.
    pub fn apply_configuration(&self, scope: ConfigScope, patch: &SettingsPatch) -> ConfigScope {
        match &scope {
            ConfigScope::Global => {
                {
                    let mut global = self.global.write().unwrap_or_else(PoisonError::into_inner);
                    *global = global.merged(patch);
                }
                let contexts: Vec<_> = self
                    .state
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .contexts
                    .values()
                    .cloned()
                    .collect();
                for context in contexts {
                    context.invalidate_settings();
                }
                tracing::debug!("Applied global configuration");
            }
            ConfigScope::Workspace(root) => {
                self.add_root(root);
                self.context_for(&directory_uri(root))
                    .set_workspace_patch(patch);
                tracing::debug!(root = %root, "Applied workspace configuration");
            }
            ConfigScope::Document(uri) => {
                self.context_for(uri).set_document_patch(uri, patch);
                tracing::debug!(uri = %uri, "Applied document configuration");
            }
        }
        scope
    }

    /// Whether a change to `scope` can alter the settings of `uri`.
    #[must_use]
    pub fn affects(&self, scope: &ConfigScope, uri: &DocumentUri) -> bool {
        match scope {
            ConfigScope::Global => true,
            ConfigScope::Workspace(root) => self.owning_root(uri) == directory_uri(root),
            ConfigScope::Document(target) => target == uri,
        }
    }

    fn owning_root(&self, uri: &DocumentUri) -> DocumentUri {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        owning_root_in(&state, uri)
    }

    /// Number of live contexts, implicit ones included.
    #[must_use]
    pub fn context_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contexts
            .len()
    }
}

fn owning_root_in(state: &ManagerState, uri: &DocumentUri) -> DocumentUri {
    state
        .registered
        .iter()
        .filter(|root| uri.as_str().starts_with(root.as_str()) || *root == &directory_uri(uri))
        .max_by_key(|root| root.as_str().len())
        .cloned()
        .unwrap_or_else(|| implicit_root(uri))
}

/// Parent directory of `uri`, or `uri` itself when it has no hierarchy.
fn implicit_root(uri: &DocumentUri) -> DocumentUri {
    uri.join(".").unwrap_or_else(|_| uri.clone())
}

fn load_workspace_patch(root: &DocumentUri) -> SettingsPatch {
    let Some(dir) = uri_to_path(root) else {
        return SettingsPatch::default();
    };
    match SettingsPatch::load(&workspace_config_path(&dir)) {
        Ok(patch) => patch.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(root = %root, error = %e, "Ignoring workspace settings file");
            SettingsPatch::default()
        }
    }
}
