//! Memoized per-document settings.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use drover_config::Settings;
use drover_types::DocumentUri;

#[derive(Debug, Default)]
struct CacheState {
    generation: u64,
    entries: HashMap<DocumentUri, Arc<Settings>>,
}

/// Lazily computed settings, one `Arc` per document.
///
/// Readers see either the value from before an invalidation or the one
/// computed after it; entries are replaced, never mutated. A computation that
/// raced with an invalidation is returned to its caller but not cached.
#[derive(Debug, Default)]
pub struct SettingsCache {
    state: RwLock<CacheState>,
}

impl SettingsCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(
        &self,
        uri: &DocumentUri,
        compute: impl FnOnce() -> Settings,
    ) -> Arc<Settings> {
        let generation = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = state.entries.get(uri) {
                return Arc::clone(hit);
            }
            state.generation
        };

        let computed = Arc::new(compute());

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.generation != generation {
            tracing::debug!(uri = %uri, "Settings invalidated during computation; not caching");
            return computed;
        }
        Arc::clone(state.entries.entry(uri.clone()).or_insert(computed))
    }

    pub fn invalidate(&self, uri: &DocumentUri) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.generation += 1;
        state.entries.remove(uri);
    }

    pub fn invalidate_all(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.generation += 1;
        state.entries = HashMap::new();
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    #[must_use]
    pub fn is_cached(&self, uri: &DocumentUri) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .contains_key(uri)
    }
}
