//! Ansible installation metadata for a workspace.
//!
//! Probed once per workspace (and on demand) by running `ansible --version`
//! and `ansible-config dump` under the resolved environment. Probe failures
//! degrade to empty metadata; they never fail the caller.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use drover_config::Settings;
use drover_process::{ProcessError, ProcessRequest, ProcessRunner, ResolvedEnvironment};
use tokio_util::sync::CancellationToken;

const COLLECTIONS_PATHS_KEYS: &[&str] = &["COLLECTIONS_PATHS", "COLLECTIONS_PATH"];

/// What is known about the toolchain a workspace runs against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceMetadata {
    /// e.g. `2.15.3`.
    pub ansible_version: Option<String>,
    /// `ansible-config dump` key to raw value.
    pub config: BTreeMap<String, String>,
    pub collections_paths: Vec<PathBuf>,
    pub lint_available: bool,
}

/// Read-mostly snapshot of [`WorkspaceMetadata`].
#[derive(Debug, Default)]
pub struct MetadataCache {
    current: RwLock<Arc<WorkspaceMetadata>>,
}

impl MetadataCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<WorkspaceMetadata> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn replace(&self, metadata: WorkspaceMetadata) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(metadata);
    }
}

/// Run the version and config probes under `env`.
pub async fn probe_metadata(
    runner: &ProcessRunner,
    env: &ResolvedEnvironment,
    settings: &Settings,
    cancel: &CancellationToken,
) -> WorkspaceMetadata {
    let timeout = settings.execution.timeout;
    let mut metadata = WorkspaceMetadata {
        lint_available: env.locate(&settings.validation.lint.path).is_some(),
        ..WorkspaceMetadata::default()
    };

    let version = ProcessRequest::new(settings.ansible.path.clone(), timeout)
        .args(["--version"])
        .env(env.overlay().clone());
    let mut version_collections = Vec::new();
    if let Some(stdout) = probe(runner, &version, cancel).await {
        metadata.ansible_version = parse_ansible_version(&stdout);
        version_collections = parse_collection_location(&stdout);
    }

    let dump = ProcessRequest::new(settings.ansible.config_command(), timeout)
        .args(["dump"])
        .env(env.overlay().clone());
    if let Some(stdout) = probe(runner, &dump, cancel).await {
        metadata.config = parse_config_dump(&stdout);
    }

    metadata.collections_paths = COLLECTIONS_PATHS_KEYS
        .iter()
        .find_map(|key| metadata.config.get(*key))
        .map(|raw| parse_path_list(raw))
        .unwrap_or(version_collections);

    tracing::debug!(
        version = metadata.ansible_version.as_deref().unwrap_or("unknown"),
        config_keys = metadata.config.len(),
        lint_available = metadata.lint_available,
        "Probed workspace metadata"
    );
    metadata
}

async fn probe(
    runner: &ProcessRunner,
    request: &ProcessRequest,
    cancel: &CancellationToken,
) -> Option<String> {
    match runner.run(request, cancel).await {
        Ok(output) => Some(output.stdout),
        Err(ProcessError::Cancelled { .. }) => None,
        Err(e) => {
            tracing::warn!(
                command = %request.executable,
                error = %e,
                "Metadata probe failed"
            );
            None
        }
    }
}

/// `ansible [core 2.15.3]` or `ansible 2.9.27` on the first line.
#[must_use]
pub fn parse_ansible_version(stdout: &str) -> Option<String> {
    let first = stdout.lines().next()?.trim();
    let rest = first.strip_prefix("ansible")?.trim();
    let version = match rest.strip_prefix('[') {
        Some(bracketed) => bracketed
            .trim_end_matches(']')
            .split_whitespace()
            .next_back()?,
        None => rest.split_whitespace().next()?,
    };
    version
        .starts_with(|c: char| c.is_ascii_digit())
        .then(|| version.to_string())
}

/// `KEY(source) = value` lines; anything else is skipped.
#[must_use]
pub fn parse_config_dump(stdout: &str) -> BTreeMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| {
            let (lhs, value) = line.split_once(" = ")?;
            let key = lhs.split_once('(').map_or(lhs, |(key, _)| key).trim();
            let well_formed = !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
            if !well_formed {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// `ansible collection location = a:b` from `ansible --version`.
fn parse_collection_location(stdout: &str) -> Vec<PathBuf> {
    stdout
        .lines()
        .find_map(|line| {
            line.trim()
                .strip_prefix("ansible collection location = ")
                .map(|paths| {
                    std::env::split_paths(paths)
                        .filter(|p| !p.as_os_str().is_empty())
                        .collect()
                })
        })
        .unwrap_or_default()
}

/// A config value in list syntax (`['a', 'b']`) or a bare `a:b` path list.
fn parse_path_list(raw: &str) -> Vec<PathBuf> {
    let raw = raw.trim();
    match raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        Some(items) => items
            .split(',')
            .map(|item| item.trim().trim_matches(|c| c == '\'' || c == '"'))
            .filter(|item| !item.is_empty())
            .map(PathBuf::from)
            .collect(),
        None => std::env::split_paths(raw)
            .filter(|p| !p.as_os_str().is_empty())
            .collect(),
    }
}
