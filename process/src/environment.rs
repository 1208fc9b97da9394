//! Python environment resolution.
//!
//! Determines which interpreter the toolchain runs under and the environment
//! overlay (`PATH`, `VIRTUAL_ENV`, color overrides) every child process gets.
//!
//! Precedence:
//! 1. an explicit interpreter path that exists on disk
//! 2. a configured activation script, sourced in a throwaway shell
//! 3. `python3` / `python` on the ambient `PATH`

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use drover_config::Settings;
use drover_types::{EnvOverlay, with_color_overrides};
use tokio_util::sync::CancellationToken;

use crate::container::{ContainerRuntime, locate_engine};
use crate::runner::{ProcessError, ProcessRequest, ProcessRunner};

const INTERPRETER_NAMES: &[&str] = &["python3", "python"];

/// Variables that differ after sourcing any script and say nothing about the
/// activated environment.
const SHELL_NOISE: &[&str] = &["_", "OLDPWD", "PWD", "SHLVL"];

/// `$1` is the script, `$2` an absolute `env` so the dump does not depend on
/// the activated `PATH`.
const ACTIVATION_SNIPPET: &str = ". \"$1\" >/dev/null && exec \"$2\"";

/// Where an interpreter came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentSource {
    InterpreterPath,
    ActivationScript,
    AmbientPath,
}

impl EnvironmentSource {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            EnvironmentSource::InterpreterPath => "interpreter path",
            EnvironmentSource::ActivationScript => "activation script",
            EnvironmentSource::AmbientPath => "PATH",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvironmentResolutionError {
    #[error("no Python interpreter found: {detail}")]
    NotFound { detail: String },
    #[error("activation script {} failed: {reason}", script.display())]
    ActivationFailed { script: PathBuf, reason: String },
    #[error("no container engine found for the execution environment (tried {tried})")]
    ContainerEngineNotFound { tried: String },
    #[error("environment resolution was cancelled")]
    Cancelled,
}

/// The environment external tools run under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEnvironment {
    interpreter: PathBuf,
    overlay: EnvOverlay,
    source: EnvironmentSource,
    ambient_path: Option<String>,
}

impl ResolvedEnvironment {
    #[must_use]
    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// Variables to layer over the inherited environment of every tool run.
    #[must_use]
    pub fn overlay(&self) -> &EnvOverlay {
        &self.overlay
    }

    #[must_use]
    pub fn source(&self) -> EnvironmentSource {
        self.source
    }

    /// Effective `PATH` for child processes.
    #[must_use]
    pub fn search_path(&self) -> Option<&str> {
        self.overlay
            .get("PATH")
            .map(String::as_str)
            .or(self.ambient_path.as_deref())
    }

    /// Locate `tool` on the effective `PATH`. Paths are checked directly.
    #[must_use]
    pub fn locate(&self, tool: &str) -> Option<PathBuf> {
        let candidate = Path::new(tool);
        if candidate.is_absolute() || candidate.components().count() > 1 {
            return candidate.is_file().then(|| candidate.to_path_buf());
        }
        locate_in(tool, self.search_path())
    }
}

/// The environment the server itself was started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmbientEnv {
    /// Read from the running process.
    Process,
    /// A fixed snapshot, used when the server's own environment must not leak.
    Fixed(EnvOverlay),
}

impl AmbientEnv {
    fn vars(&self) -> EnvOverlay {
        match self {
            AmbientEnv::Process => std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
            AmbientEnv::Fixed(vars) => vars.clone(),
        }
    }

    fn path(&self) -> Option<String> {
        match self {
            AmbientEnv::Process => std::env::var("PATH").ok(),
            AmbientEnv::Fixed(vars) => vars.get("PATH").cloned(),
        }
    }
}

/// Resolves the Python environment for a settings snapshot.
#[derive(Debug, Clone)]
pub struct EnvironmentResolver {
    runner: ProcessRunner,
    ambient: AmbientEnv,
    activation_timeout: Duration,
}

impl Default for EnvironmentResolver {
    fn default() -> Self {
        Self::new(ProcessRunner::new())
    }
}

impl EnvironmentResolver {
    #[must_use]
    pub fn new(runner: ProcessRunner) -> Self {
        Self {
            runner,
            ambient: AmbientEnv::Process,
            activation_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_ambient(mut self, ambient: AmbientEnv) -> Self {
        self.ambient = ambient;
        self
    }

    #[must_use]
    pub fn with_activation_timeout(mut self, timeout: Duration) -> Self {
        self.activation_timeout = timeout;
        self
    }

    /// Resolve the interpreter and overlay for `settings`.
    ///
    /// A missing interpreter path, or an activation script that leaves no
    /// interpreter on `PATH`, falls through to the next source. A failing
    /// activation script does not.
    pub async fn resolve(
        &self,
        settings: &Settings,
        cancel: &CancellationToken,
    ) -> Result<ResolvedEnvironment, EnvironmentResolutionError> {
        let ambient_path = self.ambient.path();

        if let Some(interpreter) = &settings.python.interpreter_path {
            if interpreter.exists() {
                let resolved = interpreter_environment(interpreter, ambient_path);
                log_resolved(&resolved);
                return Ok(resolved);
            }
            tracing::warn!(
                interpreter = %interpreter.display(),
                "Configured interpreter does not exist; trying other sources"
            );
        }

        if let Some(script) = &settings.python.activation_script {
            if let Some(resolved) = self
                .from_activation_script(script, ambient_path.clone(), cancel)
                .await?
            {
                log_resolved(&resolved);
                return Ok(resolved);
            }
            tracing::warn!(
                script = %script.display(),
                "Activation script put no interpreter on PATH; trying PATH"
            );
        }

        let Some(interpreter) = find_interpreter(ambient_path.as_deref()) else {
            return Err(EnvironmentResolutionError::NotFound {
                detail: not_found_detail(settings),
            });
        };
        let resolved = ResolvedEnvironment {
            interpreter,
            overlay: with_color_overrides(EnvOverlay::new()),
            source: EnvironmentSource::AmbientPath,
            ambient_path,
        };
        log_resolved(&resolved);
        Ok(resolved)
    }

    /// Locate the container engine for an execution environment on the
    /// ambient `PATH`. No Python interpreter is needed on the host.
    pub fn resolve_container(
        &self,
        settings: &Settings,
    ) -> Result<ContainerRuntime, EnvironmentResolutionError> {
        let ee = &settings.execution_environment;
        let runtime = locate_engine(ee, self.ambient.path().as_deref()).ok_or_else(|| {
            EnvironmentResolutionError::ContainerEngineNotFound {
                tried: ee.container_engine.candidates().join(", "),
            }
        })?;
        tracing::info!(
            engine = %runtime.engine().display(),
            image = runtime.image(),
            "Resolved execution environment"
        );
        Ok(runtime)
    }

    async fn from_activation_script(
        &self,
        script: &Path,
        ambient_path: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Option<ResolvedEnvironment>, EnvironmentResolutionError> {
        let failed = |reason: String| EnvironmentResolutionError::ActivationFailed {
            script: script.to_path_buf(),
            reason,
        };

        if !script.is_file() {
            return Err(failed("script does not exist".to_string()));
        }

        let ambient = self.ambient.vars();
        let shell = activation_shell();
        let request = ProcessRequest::new(shell.to_string_lossy(), self.activation_timeout)
            .args([
                "-c".to_string(),
                ACTIVATION_SNIPPET.to_string(),
                "drover-activate".to_string(),
                script.to_string_lossy().into_owned(),
                env_program().to_string_lossy().into_owned(),
            ])
            .env(ambient.clone())
            .isolated();

        let output = match self.runner.run(&request, cancel).await {
            Ok(output) => output,
            Err(ProcessError::Cancelled { .. }) => {
                return Err(EnvironmentResolutionError::Cancelled);
            }
            Err(ProcessError::NonZeroExit { output, .. }) => {
                let stderr = output.stderr.trim();
                let reason = if stderr.is_empty() {
                    format!("sourcing exited with {:?}", output.exit_code)
                } else {
                    stderr.to_string()
                };
                return Err(failed(reason));
            }
            Err(e) => return Err(failed(e.to_string())),
        };

        let activated = parse_env_dump(&output.stdout);
        let overlay = diff_env(&ambient, &activated);
        let search_path = overlay
            .get("PATH")
            .cloned()
            .or_else(|| ambient_path.clone());

        Ok(
            find_interpreter(search_path.as_deref()).map(|interpreter| ResolvedEnvironment {
                interpreter,
                overlay: with_color_overrides(overlay),
                source: EnvironmentSource::ActivationScript,
                ambient_path,
            }),
        )
    }
}

fn interpreter_environment(
    interpreter: &Path,
    ambient_path: Option<String>,
) -> ResolvedEnvironment {
    let mut overlay = EnvOverlay::new();
    if let Some(bin_dir) = interpreter.parent().filter(|p| !p.as_os_str().is_empty()) {
        let mut dirs = vec![bin_dir.to_path_buf()];
        if let Some(path) = &ambient_path {
            dirs.extend(std::env::split_paths(path));
        }
        if let Ok(joined) = std::env::join_paths(dirs)
            && let Ok(joined) = joined.into_string()
        {
            overlay.insert("PATH".to_string(), joined);
        }
        if let Some(env_root) = bin_dir.parent().filter(|p| !p.as_os_str().is_empty()) {
            overlay.insert(
                "VIRTUAL_ENV".to_string(),
                env_root.to_string_lossy().into_owned(),
            );
        }
    }

    ResolvedEnvironment {
        interpreter: interpreter.to_path_buf(),
        overlay: with_color_overrides(overlay),
        source: EnvironmentSource::InterpreterPath,
        ambient_path,
    }
}

fn log_resolved(resolved: &ResolvedEnvironment) {
    tracing::info!(
        interpreter = %resolved.interpreter.display(),
        source = resolved.source.label(),
        "Resolved Python environment"
    );
}

fn not_found_detail(settings: &Settings) -> String {
    match &settings.python.interpreter_path {
        Some(path) => format!(
            "{} does not exist and no python3 or python is on PATH",
            path.display()
        ),
        None => "no python3 or python is on PATH".to_string(),
    }
}

#[cfg(unix)]
fn activation_shell() -> PathBuf {
    which::which("bash").unwrap_or_else(|_| PathBuf::from("/bin/sh"))
}

#[cfg(not(unix))]
fn activation_shell() -> PathBuf {
    PathBuf::from("sh")
}

fn env_program() -> PathBuf {
    which::which("env").unwrap_or_else(|_| PathBuf::from("env"))
}

pub(crate) fn locate_in(tool: &str, search_path: Option<&str>) -> Option<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    which::which_in(tool, search_path.map(OsString::from), cwd).ok()
}

fn find_interpreter(search_path: Option<&str>) -> Option<PathBuf> {
    INTERPRETER_NAMES
        .iter()
        .find_map(|name| locate_in(name, search_path))
}

/// Parse `env` output. Lines that do not start a `NAME=` assignment continue
/// the previous value.
fn parse_env_dump(dump: &str) -> EnvOverlay {
    let mut vars = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in dump.lines() {
        if let Some((name, value)) = line.split_once('=')
            && is_env_name(name)
        {
            vars.insert(name.to_string(), value.to_string());
            current = Some(name.to_string());
        } else if let Some(name) = &current
            && let Some(value) = vars.get_mut(name)
        {
            value.push('\n');
            value.push_str(line);
        }
    }

    vars
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Variables that are new or changed in `after`.
fn diff_env(before: &EnvOverlay, after: &EnvOverlay) -> EnvOverlay {
    after
        .iter()
        .filter(|(name, _)| !SHELL_NOISE.contains(&name.as_str()))
        .filter(|(name, value)| before.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
