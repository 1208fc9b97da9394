//! Bounded, cancellable execution of external tools.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use drover_types::EnvOverlay;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::guard::{ChildGuard, set_new_session};

/// Per-stream cap on captured output.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 8 * 1024 * 1024;

/// One external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    /// Bare command name (looked up on `PATH`) or a path.
    pub executable: String,
    pub args: Vec<String>,
    /// Variables layered over the inherited environment. Overlay values win.
    pub env: EnvOverlay,
    /// When false the child sees only `env`.
    pub inherit_env: bool,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

impl ProcessRequest {
    pub fn new(executable: impl Into<String>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            env: EnvOverlay::new(),
            inherit_env: true,
            timeout,
            working_dir: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, env: EnvOverlay) -> Self {
        self.env = env;
        self
    }

    pub fn isolated(mut self) -> Self {
        self.inherit_env = false;
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// `PATH` the executable is resolved against.
    fn search_path(&self) -> Option<OsString> {
        match self.env.get("PATH") {
            Some(path) => Some(OsString::from(path)),
            None if self.inherit_env => std::env::var_os("PATH"),
            None => None,
        }
    }
}

/// Captured result of a process that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl ProcessOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn {executable}: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: io::Error,
    },
    #[error("{executable} timed out after {}s", timeout.as_secs_f64())]
    Timeout {
        executable: String,
        timeout: Duration,
    },
    #[error("{executable} exited with {}", describe_exit(output.exit_code))]
    NonZeroExit {
        executable: String,
        output: ProcessOutput,
    },
    #[error("{executable} was cancelled")]
    Cancelled { executable: String },
}

impl ProcessError {
    /// Captured output, available only for [`ProcessError::NonZeroExit`].
    #[must_use]
    pub fn output(&self) -> Option<&ProcessOutput> {
        match self {
            ProcessError::NonZeroExit { output, .. } => Some(output),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessError::Cancelled { .. })
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    }
}

enum Waited {
    Exited(io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runs external tools with a timeout, cancellation, and output caps.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    max_output_bytes: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    #[must_use]
    pub fn with_max_output_bytes(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    /// Run `request` to completion.
    ///
    /// The child (and its process group on Unix) is killed when the timeout
    /// elapses, when `cancel` fires, or when the returned future is dropped.
    /// The timeout and `cancel` also bound collecting output after the child
    /// exits. A zero exit status is the only `Ok` outcome.
    pub async fn run(
        &self,
        request: &ProcessRequest,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError> {
        let executable = request.executable.clone();
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled { executable });
        }

        let program = resolve_program(request).map_err(|source| ProcessError::Spawn {
            executable: executable.clone(),
            source,
        })?;

        let mut cmd = Command::new(&program);
        cmd.args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !request.inherit_env {
            cmd.env_clear();
        }
        cmd.envs(&request.env);
        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
        }
        set_new_session(&mut cmd);

        tracing::debug!(
            program = %program.display(),
            args = ?request.args,
            timeout_ms = request.timeout.as_millis() as u64,
            "Spawning process"
        );

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            executable: executable.clone(),
            source,
        })?;
        let mut guard = ChildGuard::new(child);

        let (stdout, stderr) = match guard.child_mut() {
            Some(child) => (child.stdout.take(), child.stderr.take()),
            None => (None, None),
        };
        let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
            return Err(ProcessError::Spawn {
                executable,
                source: io::Error::other("failed to capture output pipes"),
            });
        };

        let stdout_task = tokio::spawn(read_to_end_limited(stdout, self.max_output_bytes));
        let stderr_task = tokio::spawn(read_to_end_limited(stderr, self.max_output_bytes));
        let readers = [stdout_task.abort_handle(), stderr_task.abort_handle()];
        let abandon = |guard: ChildGuard| {
            drop(guard);
            readers.iter().for_each(tokio::task::AbortHandle::abort);
        };

        // One deadline covers the leader and the drain of its pipes.
        let deadline = time::Instant::now() + request.timeout;
        let waited = match guard.child_mut() {
            Some(child) => {
                tokio::select! {
                    status = child.wait() => Waited::Exited(status),
                    () = time::sleep_until(deadline) => Waited::TimedOut,
                    () = cancel.cancelled() => Waited::Cancelled,
                }
            }
            None => Waited::Cancelled,
        };

        let status = match waited {
            Waited::Exited(status) => status,
            Waited::TimedOut => {
                abandon(guard);
                return Err(timed_out(executable, request.timeout));
            }
            Waited::Cancelled => {
                abandon(guard);
                return Err(cancelled(executable));
            }
        };

        let status = match status {
            Ok(status) => status,
            Err(source) => {
                abandon(guard);
                return Err(ProcessError::Spawn { executable, source });
            }
        };

        // Workers left in the group would keep the pipes open.
        if guard.kill_group() {
            tracing::debug!(executable = %executable, "Killed leftover process group members");
        }
        guard.disarm();

        let drained = tokio::select! {
            (stdout, stderr) = async { tokio::join!(stdout_task, stderr_task) } => {
                Some((stdout.unwrap_or_default(), stderr.unwrap_or_default()))
            }
            () = time::sleep_until(deadline) => None,
            () = cancel.cancelled() => {
                abandon(guard);
                return Err(cancelled(executable));
            }
        };
        let Some(((stdout_bytes, stdout_truncated), (stderr_bytes, stderr_truncated))) = drained
        else {
            abandon(guard);
            return Err(timed_out(executable, request.timeout));
        };

        let output = ProcessOutput {
            exit_code: status.code(),
            stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
            stdout_truncated,
            stderr_truncated,
        };

        tracing::debug!(
            executable = %executable,
            exit_code = ?output.exit_code,
            stdout_len = output.stdout.len(),
            stderr_len = output.stderr.len(),
            "Process finished"
        );

        if output.success() {
            Ok(output)
        } else {
            Err(ProcessError::NonZeroExit { executable, output })
        }
    }
}

fn timed_out(executable: String, timeout: Duration) -> ProcessError {
    tracing::warn!(
        executable = %executable,
        timeout_ms = timeout.as_millis() as u64,
        "Process timed out"
    );
    ProcessError::Timeout {
        executable,
        timeout,
    }
}

fn cancelled(executable: String) -> ProcessError {
    tracing::debug!(executable = %executable, "Process cancelled");
    ProcessError::Cancelled { executable }
}

/// Resolve a bare command name against the request's effective `PATH`.
fn resolve_program(request: &ProcessRequest) -> io::Result<PathBuf> {
    let executable = Path::new(&request.executable);
    if executable.is_absolute() || executable.components().count() > 1 {
        return Ok(executable.to_path_buf());
    }

    let cwd = request
        .working_dir
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("/"));
    which::which_in(&request.executable, request.search_path(), cwd).map_err(|e| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} not found on PATH: {e}", request.executable),
        )
    })
}

/// Read a stream to EOF, keeping at most `max_bytes`.
///
/// The stream is drained past the cap so a chatty child never blocks on a
/// full pipe.
async fn read_to_end_limited<R: tokio::io::AsyncRead + Unpin + Send + 'static>(
    mut reader: R,
    max_bytes: usize,
) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = match reader.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let remaining = max_bytes.saturating_sub(buf.len());
        let take = remaining.min(n);
        buf.extend_from_slice(&tmp[..take]);
        if take < n {
            truncated = true;
        }
    }

    (buf, truncated)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> ProcessRequest {
        ProcessRequest::new("sh", Duration::from_secs(10)).args(["-c", script])
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let runner = ProcessRunner::new();
        let output = runner
            .run(&sh("echo out; echo err >&2"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(!output.stdout_truncated);
    }

    #[tokio::test]
    async fn non_zero_exit_keeps_output() {
        let runner = ProcessRunner::new();
        let err = runner
            .run(&sh("echo broken >&2; exit 3"), &CancellationToken::new())
            .await
            .unwrap_err();

        let output = err.output().expect("output for non-zero exit");
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr, "broken\n");
        assert!(err.to_string().contains("exit code 3"));
    }

    #[tokio::test]
    async fn overlay_values_reach_the_child() {
        let mut env = EnvOverlay::new();
        env.insert("DROVER_TEST_VALUE".into(), "from-overlay".into());
        let request = sh("printf %s \"$DROVER_TEST_VALUE\"").env(env);

        let output = ProcessRunner::new()
            .run(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.stdout, "from-overlay");
    }

    #[tokio::test]
    async fn isolated_requests_see_only_the_overlay() {
        let mut env = EnvOverlay::new();
        env.insert("PATH".into(), "/usr/bin:/bin".into());
        env.insert("ONLY_THIS".into(), "1".into());
        let request = sh("printf %s \"${CARGO_MANIFEST_DIR:-unset}:$ONLY_THIS\"")
            .env(env)
            .isolated();

        let output = ProcessRunner::new()
            .run(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.stdout, "unset:1");
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_error() {
        let request = ProcessRequest::new("drover-definitely-missing-tool", Duration::from_secs(1));
        let err = ProcessRunner::new()
            .run(&request, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ProcessError::Spawn { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected spawn error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let request = ProcessRequest::new("sh", Duration::from_millis(100)).args(["-c", "sleep 5"]);
        let started = Instant::now();
        let err = ProcessRunner::new()
            .run(&request, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn cancellation_stops_a_running_child() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = ProcessRunner::new()
            .run(&sh("sleep 5"), &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn background_workers_do_not_outlive_the_run() {
        let request = ProcessRequest::new("sh", Duration::from_secs(2))
            .args(["-c", "sleep 8 & echo started"]);
        let started = Instant::now();
        let output = ProcessRunner::new()
            .run(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.stdout, "started\n");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn escaped_workers_cannot_hold_the_run_past_its_timeout() {
        // `setsid` moves the worker out of the tool's process group.
        let script = "command -v setsid >/dev/null && setsid sleep 8 & echo started";
        let request = ProcessRequest::new("sh", Duration::from_millis(500)).args(["-c", script]);
        let started = Instant::now();
        let result = ProcessRunner::new()
            .run(&request, &CancellationToken::new())
            .await;

        assert!(
            matches!(result, Ok(_) | Err(ProcessError::Timeout { .. })),
            "{result:?}"
        );
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn cancellation_covers_collecting_output() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let script = "command -v setsid >/dev/null && setsid sleep 8 & echo started";
        let started = Instant::now();
        let result = ProcessRunner::new().run(&sh(script), &cancel).await;

        assert!(
            matches!(result, Ok(_) | Err(ProcessError::Cancelled { .. })),
            "{result:?}"
        );
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn pre_cancelled_token_never_spawns() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = ProcessRequest::new("drover-definitely-missing-tool", Duration::from_secs(1));

        let err = ProcessRunner::new().run(&request, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn output_is_capped_per_stream() {
        let runner = ProcessRunner::with_max_output_bytes(4);
        let output = runner
            .run(&sh("printf 0123456789"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.stdout, "0123");
        assert!(output.stdout_truncated);
        assert!(!output.stderr_truncated);
    }
}
