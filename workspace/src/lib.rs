//! Workspace-scoped state for Drover.
//!
//! - [`WorkspaceManager`]: routes documents to the context of their root
//! - [`WorkspaceContext`]: layered settings and toolchain metadata for one root
//! - [`SettingsCache`]: per-document memoized [`drover_config::Settings`]
//! - [`MetadataCache`]: the last [`WorkspaceMetadata`] probe

mod context;
mod manager;
mod metadata;
mod settings_cache;

pub use context::WorkspaceContext;
pub use manager::WorkspaceManager;
pub use metadata::{
    MetadataCache, WorkspaceMetadata, parse_ansible_version, parse_config_dump, probe_metadata,
};
pub use settings_cache::SettingsCache;
