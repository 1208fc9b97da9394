//! Partial settings as delivered by editors and config files.
//!
//! Raw deserialization structs stay private; [`SettingsPatch`] is only
//! constructed through `TryFrom<RawSettingsPatch>`, so an existing patch is
//! proof that every present value is usable.

use serde::Deserialize;

use crate::settings::ContainerEngine;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("ansible.path must not be empty")]
    EmptyAnsiblePath,
    #[error("validation.lint.path must not be empty")]
    EmptyLintPath,
    #[error("execution.timeoutSecs must be greater than zero")]
    ZeroTimeout,
    #[error("executionEnvironment.image must not be empty")]
    EmptyImage,
    #[error("validation.lint.arguments has unbalanced quoting: {0}")]
    UnbalancedArguments(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettingsPatch {
    #[serde(default)]
    python: Option<PythonPatch>,
    #[serde(default)]
    ansible: Option<AnsiblePatch>,
    #[serde(default)]
    validation: Option<RawValidationPatch>,
    #[serde(default)]
    execution: Option<ExecutionPatch>,
    #[serde(default)]
    execution_environment: Option<ExecutionEnvironmentPatch>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawValidationPatch {
    enabled: Option<bool>,
    lint: Option<RawLintPatch>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLintPatch {
    enabled: Option<bool>,
    path: Option<String>,
    arguments: Option<RawArguments>,
}

/// Editors send lint arguments as one command-line string; config files may
/// use a list.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawArguments {
    Line(String),
    List(Vec<String>),
}

impl RawArguments {
    /// A single string is split with shell quoting rules.
    fn into_vec(self) -> Result<Vec<String>, SettingsError> {
        match self {
            Self::Line(line) => {
                shlex::split(&line).ok_or(SettingsError::UnbalancedArguments(line))
            }
            Self::List(list) => Ok(list),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PythonPatch {
    pub interpreter_path: Option<String>,
    pub activation_script: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnsiblePatch {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationPatch {
    pub enabled: Option<bool>,
    pub lint: Option<LintPatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LintPatch {
    pub enabled: Option<bool>,
    pub path: Option<String>,
    pub arguments: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPatch {
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEnvironmentPatch {
    pub enabled: Option<bool>,
    pub container_engine: Option<ContainerEngine>,
    pub image: Option<String>,
}

/// A sparse set of overrides for one configuration scope.
///
/// Unknown keys are ignored so newer clients can send settings this server
/// does not know about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawSettingsPatch")]
pub struct SettingsPatch {
    pub python: Option<PythonPatch>,
    pub ansible: Option<AnsiblePatch>,
    pub validation: Option<ValidationPatch>,
    pub execution: Option<ExecutionPatch>,
    pub execution_environment: Option<ExecutionEnvironmentPatch>,
}

impl TryFrom<RawSettingsPatch> for SettingsPatch {
    type Error = SettingsError;

    fn try_from(raw: RawSettingsPatch) -> Result<Self, Self::Error> {
        if let Some(ansible) = &raw.ansible
            && ansible.path.as_deref().is_some_and(|p| p.trim().is_empty())
        {
            return Err(SettingsError::EmptyAnsiblePath);
        }
        if let Some(execution) = &raw.execution
            && execution.timeout_secs == Some(0)
        {
            return Err(SettingsError::ZeroTimeout);
        }
        if let Some(ee) = &raw.execution_environment
            && ee.image.as_deref().is_some_and(|image| image.trim().is_empty())
        {
            return Err(SettingsError::EmptyImage);
        }

        let validation = match raw.validation {
            Some(validation) => {
                let lint = match validation.lint {
                    Some(lint) => {
                        if lint.path.as_deref().is_some_and(|p| p.trim().is_empty()) {
                            return Err(SettingsError::EmptyLintPath);
                        }
                        Some(LintPatch {
                            enabled: lint.enabled,
                            path: lint.path,
                            arguments: lint.arguments.map(RawArguments::into_vec).transpose()?,
                        })
                    }
                    None => None,
                };
                Some(ValidationPatch {
                    enabled: validation.enabled,
                    lint,
                })
            }
            None => None,
        };

        Ok(Self {
            python: raw.python,
            ansible: raw.ansible,
            validation,
            execution: raw.execution,
            execution_environment: raw.execution_environment,
        })
    }
}

impl SettingsPatch {
    /// Parse a patch from a JSON value as sent by an editor.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Overlay `newer` on top of `self`; options present in `newer` win.
    #[must_use]
    pub fn merged(&self, newer: &SettingsPatch) -> SettingsPatch {
        SettingsPatch {
            python: merge_with(&self.python, &newer.python, |old, new| PythonPatch {
                interpreter_path: pick(&old.interpreter_path, &new.interpreter_path),
                activation_script: pick(&old.activation_script, &new.activation_script),
            }),
            ansible: merge_with(&self.ansible, &newer.ansible, |old, new| AnsiblePatch {
                path: pick(&old.path, &new.path),
            }),
            validation: merge_with(&self.validation, &newer.validation, |old, new| {
                ValidationPatch {
                    enabled: new.enabled.or(old.enabled),
                    lint: merge_with(&old.lint, &new.lint, |old, new| LintPatch {
                        enabled: new.enabled.or(old.enabled),
                        path: pick(&old.path, &new.path),
                        arguments: pick(&old.arguments, &new.arguments),
                    }),
                }
            }),
            execution: merge_with(&self.execution, &newer.execution, |old, new| {
                ExecutionPatch {
                    timeout_secs: new.timeout_secs.or(old.timeout_secs),
                }
            }),
            execution_environment: merge_with(
                &self.execution_environment,
                &newer.execution_environment,
                |old, new| ExecutionEnvironmentPatch {
                    enabled: new.enabled.or(old.enabled),
                    container_engine: new.container_engine.or(old.container_engine),
                    image: pick(&old.image, &new.image),
                },
            ),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &SettingsPatch::default()
    }
}

fn pick<T: Clone>(old: &Option<T>, new: &Option<T>) -> Option<T> {
    new.clone().or_else(|| old.clone())
}

fn merge_with<T: Clone>(
    old: &Option<T>,
    new: &Option<T>,
    combine: impl FnOnce(&T, &T) -> T,
) -> Option<T> {
    match (old, new) {
        (Some(old), Some(new)) => Some(combine(old, new)),
        (None, Some(new)) => Some(new.clone()),
        (Some(old), None) => Some(old.clone()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_editor_payload_and_ignores_unknown_keys() {
        let patch = SettingsPatch::from_json(serde_json::json!({
            "python": { "interpreterPath": "/venv/bin/python" },
            "validation": {
                "enabled": true,
                "lint": { "enabled": false, "arguments": "--profile production" }
            },
            "completion": { "provideRedirectModules": true }
        }))
        .unwrap();

        assert_eq!(
            patch.python.unwrap().interpreter_path.as_deref(),
            Some("/venv/bin/python")
        );
        let lint = patch.validation.unwrap().lint.unwrap();
        assert_eq!(lint.enabled, Some(false));
        assert_eq!(
            lint.arguments,
            Some(vec!["--profile".to_string(), "production".to_string()])
        );
    }

    #[test]
    fn list_arguments_are_kept_verbatim() {
        let patch = SettingsPatch::from_json(serde_json::json!({
            "validation": { "lint": { "arguments": ["-x", "yaml[line-length]"] } }
        }))
        .unwrap();
        let lint = patch.validation.unwrap().lint.unwrap();
        assert_eq!(
            lint.arguments,
            Some(vec!["-x".to_string(), "yaml[line-length]".to_string()])
        );
    }

    #[test]
    fn argument_strings_follow_shell_quoting() {
        let patch = SettingsPatch::from_json(serde_json::json!({
            "validation": { "lint": { "arguments": "--exclude 'my roles/x' -x \"yaml[truthy]\"" } }
        }))
        .unwrap();
        let lint = patch.validation.unwrap().lint.unwrap();
        assert_eq!(
            lint.arguments,
            Some(vec![
                "--exclude".to_string(),
                "my roles/x".to_string(),
                "-x".to_string(),
                "yaml[truthy]".to_string(),
            ])
        );

        let err = SettingsPatch::from_json(serde_json::json!({
            "validation": { "lint": { "arguments": "--exclude 'my roles" } }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("unbalanced quoting"));
    }

    #[test]
    fn execution_environment_block_is_parsed_and_validated() {
        let patch = SettingsPatch::from_json(serde_json::json!({
            "executionEnvironment": { "enabled": true, "containerEngine": "docker" }
        }))
        .unwrap();
        let ee = patch.execution_environment.unwrap();
        assert_eq!(ee.enabled, Some(true));
        assert_eq!(ee.container_engine, Some(ContainerEngine::Docker));
        assert_eq!(ee.image, None);

        let err = SettingsPatch::from_json(serde_json::json!({
            "executionEnvironment": { "image": "  " }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("executionEnvironment.image"));

        assert!(
            SettingsPatch::from_json(serde_json::json!({
                "executionEnvironment": { "containerEngine": "lxc" }
            }))
            .is_err()
        );
    }

    #[test]
    fn rejects_empty_commands_and_zero_timeout() {
        let err = SettingsPatch::from_json(serde_json::json!({ "ansible": { "path": " " } }))
            .unwrap_err();
        assert!(err.to_string().contains("ansible.path"));

        let err = SettingsPatch::from_json(serde_json::json!({
            "validation": { "lint": { "path": "" } }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("validation.lint.path"));

        let err = SettingsPatch::from_json(serde_json::json!({ "execution": { "timeoutSecs": 0 } }))
            .unwrap_err();
        assert!(err.to_string().contains("timeoutSecs"));
    }

    #[test]
    fn merged_prefers_newer_values_and_keeps_older_ones() {
        let older = SettingsPatch::from_json(serde_json::json!({
            "python": { "interpreterPath": "/old/python", "activationScript": "/old/activate" },
            "validation": { "lint": { "enabled": true, "path": "lint-a" } }
        }))
        .unwrap();
        let newer = SettingsPatch::from_json(serde_json::json!({
            "python": { "interpreterPath": "/new/python" },
            "validation": { "lint": { "enabled": false } }
        }))
        .unwrap();

        let merged = older.merged(&newer);
        let python = merged.python.unwrap();
        assert_eq!(python.interpreter_path.as_deref(), Some("/new/python"));
        assert_eq!(python.activation_script.as_deref(), Some("/old/activate"));
        let lint = merged.validation.unwrap().lint.unwrap();
        assert_eq!(lint.enabled, Some(false));
        assert_eq!(lint.path.as_deref(), Some("lint-a"));
    }

    #[test]
    fn empty_object_is_empty_patch() {
        let patch = SettingsPatch::from_json(serde_json::json!({})).unwrap();
        assert!(patch.is_empty());
    }
}
