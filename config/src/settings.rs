//! Resolved per-document settings.
//!
//! A [`Settings`] value is complete: every option has a concrete value.
//! New values are produced by applying [`SettingsPatch`] layers to the
//! defaults; an existing value is never mutated in place.

use std::path::PathBuf;
use std::time::Duration;

use crate::patch::SettingsPatch;

pub const DEFAULT_ANSIBLE_PATH: &str = "ansible";
pub const DEFAULT_LINT_PATH: &str = "ansible-lint";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_EE_IMAGE: &str = "ghcr.io/ansible/community-ansible-dev-tools:latest";

/// Container engine used for execution environments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerEngine {
    /// The first of podman, docker found on `PATH`.
    #[default]
    Auto,
    Podman,
    Docker,
}

impl ContainerEngine {
    /// Executable names to try, in order.
    #[must_use]
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            ContainerEngine::Auto => &["podman", "docker"],
            ContainerEngine::Podman => &["podman"],
            ContainerEngine::Docker => &["docker"],
        }
    }
}

/// Running the toolchain inside a container image instead of a local
/// Python environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionEnvironmentSettings {
    pub enabled: bool,
    pub container_engine: ContainerEngine,
    pub image: String,
}

impl Default for ExecutionEnvironmentSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            container_engine: ContainerEngine::Auto,
            image: DEFAULT_EE_IMAGE.to_string(),
        }
    }
}

/// Python runtime selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PythonSettings {
    /// Interpreter to use verbatim (e.g. `.venv/bin/python`).
    pub interpreter_path: Option<PathBuf>,
    /// Script that activates an isolated environment when sourced.
    pub activation_script: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnsibleSettings {
    /// Base command; the syntax checker runs `<path>-playbook`.
    pub path: String,
}

impl AnsibleSettings {
    /// Command used for `--syntax-check`.
    #[must_use]
    pub fn playbook_command(&self) -> String {
        format!("{}-playbook", self.path)
    }

    /// Command used to dump the effective Ansible configuration.
    #[must_use]
    pub fn config_command(&self) -> String {
        format!("{}-config", self.path)
    }
}

impl Default for AnsibleSettings {
    fn default() -> Self {
        Self {
            path: DEFAULT_ANSIBLE_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintSettings {
    pub enabled: bool,
    pub path: String,
    /// Extra arguments placed before the fixed output-format flags.
    pub arguments: Vec<String>,
}

impl Default for LintSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: DEFAULT_LINT_PATH.to_string(),
            arguments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSettings {
    /// Master switch: when off nothing is scheduled and diagnostics are cleared.
    pub enabled: bool,
    pub lint: LintSettings,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            lint: LintSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSettings {
    /// Upper bound for every external process invocation.
    pub timeout: Duration,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Fully resolved settings for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub python: PythonSettings,
    pub ansible: AnsibleSettings,
    pub validation: ValidationSettings,
    pub execution: ExecutionSettings,
    pub execution_environment: ExecutionEnvironmentSettings,
}

impl Settings {
    /// Produce a new value with every option present in `patch` overriding ours.
    ///
    /// Empty interpreter/activation paths clear the option.
    #[must_use]
    pub fn apply(&self, patch: &SettingsPatch) -> Settings {
        let mut next = self.clone();

        if let Some(python) = &patch.python {
            if let Some(path) = &python.interpreter_path {
                next.python.interpreter_path = non_empty_path(path);
            }
            if let Some(path) = &python.activation_script {
                next.python.activation_script = non_empty_path(path);
            }
        }

        if let Some(ansible) = &patch.ansible
            && let Some(path) = &ansible.path
        {
            next.ansible.path.clone_from(path);
        }

        if let Some(validation) = &patch.validation {
            if let Some(enabled) = validation.enabled {
                next.validation.enabled = enabled;
            }
            if let Some(lint) = &validation.lint {
                if let Some(enabled) = lint.enabled {
                    next.validation.lint.enabled = enabled;
                }
                if let Some(path) = &lint.path {
                    next.validation.lint.path.clone_from(path);
                }
                if let Some(arguments) = &lint.arguments {
                    next.validation.lint.arguments = arguments.to_vec();
                }
            }
        }

        if let Some(execution) = &patch.execution
            && let Some(secs) = execution.timeout_secs
        {
            next.execution.timeout = Duration::from_secs(secs);
        }

        if let Some(ee) = &patch.execution_environment {
            if let Some(enabled) = ee.enabled {
                next.execution_environment.enabled = enabled;
            }
            if let Some(engine) = ee.container_engine {
                next.execution_environment.container_engine = engine;
            }
            if let Some(image) = &ee.image {
                next.execution_environment.image.clone_from(image);
            }
        }

        next
    }

    /// Merge defaults < global < workspace < document.
    #[must_use]
    pub fn layered(
        global: &SettingsPatch,
        workspace: &SettingsPatch,
        document: &SettingsPatch,
    ) -> Settings {
        Settings::default()
            .apply(global)
            .apply(workspace)
            .apply(document)
    }

    /// Whether the lint tool should be tried for this document.
    #[must_use]
    pub fn lint_requested(&self) -> bool {
        self.validation.enabled && self.validation.lint.enabled
    }
}

fn non_empty_path(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(value: serde_json::Value) -> SettingsPatch {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn defaults_enable_validation_and_lint() {
        let settings = Settings::default();
        assert!(settings.validation.enabled);
        assert!(settings.validation.lint.enabled);
        assert_eq!(settings.validation.lint.path, "ansible-lint");
        assert_eq!(settings.ansible.playbook_command(), "ansible-playbook");
        assert_eq!(settings.execution.timeout, Duration::from_secs(60));
        assert!(settings.python.interpreter_path.is_none());
    }

    #[test]
    fn apply_overrides_only_present_fields() {
        let base = Settings::default();
        let next = base.apply(&patch(serde_json::json!({
            "validation": { "lint": { "enabled": false } }
        })));

        assert!(!next.validation.lint.enabled);
        assert!(next.validation.enabled);
        assert_eq!(next.validation.lint.path, base.validation.lint.path);
        // The source value is untouched.
        assert!(base.validation.lint.enabled);
    }

    #[test]
    fn empty_paths_clear_python_options() {
        let with_interpreter = Settings::default().apply(&patch(serde_json::json!({
            "python": { "interpreterPath": "/venv/bin/python", "activationScript": "/venv/bin/activate" }
        })));
        assert_eq!(
            with_interpreter.python.interpreter_path,
            Some(PathBuf::from("/venv/bin/python"))
        );

        let cleared = with_interpreter.apply(&patch(serde_json::json!({
            "python": { "interpreterPath": "" }
        })));
        assert!(cleared.python.interpreter_path.is_none());
        assert_eq!(
            cleared.python.activation_script,
            Some(PathBuf::from("/venv/bin/activate"))
        );
    }

    #[test]
    fn layered_precedence_is_global_workspace_document() {
        let global = patch(serde_json::json!({
            "ansible": { "path": "global-ansible" },
            "validation": { "lint": { "path": "global-lint" } },
            "execution": { "timeoutSecs": 5 }
        }));
        let workspace = patch(serde_json::json!({
            "validation": { "lint": { "path": "workspace-lint" } }
        }));
        let document = patch(serde_json::json!({
            "validation": { "lint": { "enabled": false } }
        }));

        let settings = Settings::layered(&global, &workspace, &document);
        assert_eq!(settings.ansible.path, "global-ansible");
        assert_eq!(settings.validation.lint.path, "workspace-lint");
        assert!(!settings.validation.lint.enabled);
        assert_eq!(settings.execution.timeout, Duration::from_secs(5));
    }

    #[test]
    fn execution_environment_is_off_until_enabled() {
        let settings = Settings::default();
        assert!(!settings.execution_environment.enabled);
        assert_eq!(settings.execution_environment.image, DEFAULT_EE_IMAGE);

        let settings = settings.apply(&patch(serde_json::json!({
            "executionEnvironment": { "enabled": true, "image": "quay.io/acme/ee:1" }
        })));
        assert!(settings.execution_environment.enabled);
        assert_eq!(
            settings.execution_environment.container_engine,
            ContainerEngine::Auto
        );
        assert_eq!(settings.execution_environment.image, "quay.io/acme/ee:1");
        assert_eq!(ContainerEngine::Auto.candidates(), &["podman", "docker"]);
    }

    #[test]
    fn lint_requested_needs_both_switches() {
        let mut settings = Settings::default();
        assert!(settings.lint_requested());
        settings.validation.enabled = false;
        assert!(!settings.lint_requested());
    }
}
