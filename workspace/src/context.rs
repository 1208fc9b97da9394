//! One workspace root and the state scoped to it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use drover_config::{Settings, SettingsPatch};
use drover_types::{DocumentUri, uri_to_path};

use crate::metadata::MetadataCache;
use crate::settings_cache::SettingsCache;

/// `uri` with a trailing `/` so prefix checks stop at path boundaries.
pub(crate) fn directory_uri(uri: &DocumentUri) -> DocumentUri {
    if uri.path().ends_with('/') || uri.cannot_be_a_base() {
        return uri.clone();
    }
    let mut dir = uri.clone();
    dir.set_path(&format!("{}/", uri.path()));
    dir
}

/// Settings and metadata for every document under one root.
#[derive(Debug)]
pub struct WorkspaceContext {
    root: DocumentUri,
    settings: SettingsCache,
    metadata: MetadataCache,
    metadata_claimed: AtomicBool,
    workspace_patch: RwLock<SettingsPatch>,
    document_patches: RwLock<HashMap<DocumentUri, SettingsPatch>>,
}

impl WorkspaceContext {
    #[must_use]
    pub fn new(root: &DocumentUri, workspace_patch: SettingsPatch) -> Self {
        Self {
            root: directory_uri(root),
            settings: SettingsCache::new(),
            metadata: MetadataCache::new(),
            metadata_claimed: AtomicBool::new(false),
            workspace_patch: RwLock::new(workspace_patch),
            document_patches: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &DocumentUri {
        &self.root
    }

    /// Filesystem directory of the root; `None` for non-file schemes.
    #[must_use]
    pub fn root_path(&self) -> Option<PathBuf> {
        uri_to_path(&self.root)
    }

    #[must_use]
    pub fn contains(&self, uri: &DocumentUri) -> bool {
        uri == &self.root || uri.as_str().starts_with(self.root.as_str())
    }

    /// Settings for `uri`: defaults < `global` < workspace < document.
    pub fn settings_for(&self, uri: &DocumentUri, global: &SettingsPatch) -> Arc<Settings> {
        self.settings.get_or_compute(uri, || {
            let workspace = self
                .workspace_patch
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let patches = self
                .document_patches
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let document = patches.get(uri).cloned().unwrap_or_default();
            Settings::layered(global, &workspace, &document)
        })
    }

    pub fn set_workspace_patch(&self, patch: &SettingsPatch) {
        {
            let mut current = self
                .workspace_patch
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *current = current.merged(patch);
        }
        self.settings.invalidate_all();
    }

    pub fn set_document_patch(&self, uri: &DocumentUri, patch: &SettingsPatch) {
        {
            let mut patches = self
                .document_patches
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let merged = patches.get(uri).cloned().unwrap_or_default().merged(patch);
            patches.insert(uri.clone(), merged);
        }
        self.settings.invalidate(uri);
    }

    /// Drop the cached settings of a closed document. Its patch is kept.
    pub fn forget_document(&self, uri: &DocumentUri) {
        self.settings.invalidate(uri);
    }

    /// Re-read settings on next access, e.g. after the global layer changed.
    pub fn invalidate_settings(&self) {
        self.settings.invalidate_all();
    }

    #[must_use]
    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    /// True exactly once: the caller that gets it runs the first probe.
    pub fn claim_metadata_probe(&self) -> bool {
        !self.metadata_claimed.swap(true, Ordering::AcqRel)
    }
}
