//! Settings model and configuration loading for Drover.
//!
//! - [`Settings`]: the immutable, fully resolved per-document settings
//! - [`SettingsPatch`]: sparse overrides for one [`ConfigScope`]
//! - config file discovery (`~/.drover/config.toml`, `<root>/.drover.toml`)

mod patch;
mod settings;

pub use patch::{
    AnsiblePatch, ExecutionEnvironmentPatch, ExecutionPatch, LintPatch, PythonPatch,
    SettingsError, SettingsPatch, ValidationPatch,
};
pub use settings::{
    AnsibleSettings, ContainerEngine, DEFAULT_ANSIBLE_PATH, DEFAULT_EE_IMAGE, DEFAULT_LINT_PATH,
    DEFAULT_TIMEOUT_SECS, ExecutionEnvironmentSettings, ExecutionSettings, LintSettings,
    PythonSettings, Settings, ValidationSettings,
};

use std::fs;
use std::path::{Path, PathBuf};

use drover_types::DocumentUri;

/// File name of the per-workspace settings file.
pub const WORKSPACE_CONFIG_FILE: &str = ".drover.toml";

/// Which layer a configuration change applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConfigScope {
    /// Client-wide settings.
    Global,
    /// Settings for every document under a workspace root.
    Workspace(DocumentUri),
    /// Settings for a single document.
    Document(DocumentUri),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

impl SettingsPatch {
    /// Load a TOML settings file. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Option<SettingsPatch>, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let patch = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Loaded settings file");
        Ok(Some(patch))
    }
}

/// `~/.drover/config.toml`, if a home directory exists.
#[must_use]
pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".drover").join("config.toml"))
}

/// `<root>/.drover.toml`.
#[must_use]
pub fn workspace_config_path(root: &Path) -> PathBuf {
    root.join(WORKSPACE_CONFIG_FILE)
}
