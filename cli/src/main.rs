//! Drover CLI - one-shot playbook checks and environment inspection.
//!
//! ```text
//! main() -> Cli::parse() -> check | env
//!             check: LanguageServer (zero debounce) -> ChannelPublisher -> stdout
//!             env:   EnvironmentResolver + metadata probe -> stdout
//! ```
//!
//! Results go to stdout; logs go to stderr.

mod args;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use drover_config::{
    ExecutionPatch, LintPatch, Settings, SettingsPatch, ValidationPatch, global_config_path,
    workspace_config_path,
};
use drover_engine::{ChannelPublisher, CoordinatorConfig, LanguageServer};
use drover_process::EnvironmentResolver;
use drover_types::{Diagnostic, DocumentUri};
use tokio_util::sync::CancellationToken;

use crate::args::{CheckArgs, Cli, Command};

/// Generous upper bound on a whole run; tool timeouts are enforced per process.
const PUBLISH_GRACE: Duration = Duration::from_secs(5);

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .with(env_filter)
        .init();
}

fn load_global_patch() -> SettingsPatch {
    let Some(path) = global_config_path() else {
        return SettingsPatch::default();
    };
    match SettingsPatch::load(&path) {
        Ok(patch) => patch.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring global settings file");
            SettingsPatch::default()
        }
    }
}

fn cli_patch(check: &CheckArgs) -> SettingsPatch {
    SettingsPatch {
        validation: check.no_lint.then(|| ValidationPatch {
            enabled: None,
            lint: Some(LintPatch {
                enabled: Some(false),
                ..LintPatch::default()
            }),
        }),
        execution: check.timeout.map(|timeout| ExecutionPatch {
            timeout_secs: Some(timeout.as_secs()),
        }),
        ..SettingsPatch::default()
    }
}

fn document_uri(path: &Path) -> Result<(PathBuf, DocumentUri)> {
    let absolute = std::fs::canonicalize(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let uri = DocumentUri::from_file_path(&absolute)
        .map_err(|()| anyhow::anyhow!("not a local path: {}", absolute.display()))?;
    Ok((absolute, uri))
}

async fn run_check(check: CheckArgs) -> Result<ExitCode> {
    let global = load_global_patch().merged(&cli_patch(&check));
    let timeout = Settings::default().apply(&global).execution.timeout;
    let (publisher, mut rx) = ChannelPublisher::new();
    let server = LanguageServer::with_resolver(
        global,
        Arc::new(publisher),
        EnvironmentResolver::default(),
        CoordinatorConfig {
            debounce: Duration::ZERO,
        },
    );

    let cwd = std::env::current_dir().context("cannot read the current directory")?;
    if let Ok(root) = DocumentUri::from_directory_path(&cwd) {
        server.add_workspace_root(&root);
    }

    let mut pending: HashMap<DocumentUri, (PathBuf, Option<Vec<Diagnostic>>)> = HashMap::new();
    let mut order = Vec::new();
    for file in &check.files {
        let (path, uri) = document_uri(file)?;
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        server.on_document_open(uri.clone(), text, 1);
        order.push(uri.clone());
        pending.insert(uri, (path, None));
    }

    // Resolution and one tool run per file, each bounded by the tool timeout.
    let deadline = timeout * 2 + PUBLISH_GRACE;
    let collect = async {
        let mut outstanding = pending.len();
        while outstanding > 0 {
            let Some(publication) = rx.recv().await else {
                break;
            };
            if let Some((_, slot @ None)) = pending.get_mut(&publication.uri) {
                *slot = Some(publication.diagnostics);
                outstanding -= 1;
            }
        }
    };
    if tokio::time::timeout(deadline, collect).await.is_err() {
        tracing::warn!("Timed out waiting for diagnostics");
    }
    server.shutdown();

    let mut errors = 0usize;
    for uri in &order {
        let Some((path, diagnostics)) = pending.get(uri) else {
            continue;
        };
        let Some(diagnostics) = diagnostics else {
            eprintln!("{}: no diagnostics produced", path.display());
            errors += 1;
            continue;
        };
        let mut diagnostics = diagnostics.clone();
        diagnostics.sort_by_key(|d| (d.range().start, d.severity()));
        for diagnostic in &diagnostics {
            println!("{}", diagnostic.display_with_path(path));
            if diagnostic.severity().is_error() {
                errors += 1;
            }
        }
    }

    Ok(if errors > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn run_env(dir: &Path) -> Result<ExitCode> {
    let dir = std::fs::canonicalize(dir)
        .with_context(|| format!("cannot open {}", dir.display()))?;
    let workspace = match SettingsPatch::load(&workspace_config_path(&dir)) {
        Ok(patch) => patch.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring workspace settings file");
            SettingsPatch::default()
        }
    };
    let global = load_global_patch();
    let settings = Settings::layered(&global, &workspace, &SettingsPatch::default());

    let cancel = CancellationToken::new();
    let env = match EnvironmentResolver::default().resolve(&settings, &cancel).await {
        Ok(env) => env,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    println!(
        "interpreter: {} (from {})",
        env.interpreter().display(),
        env.source().label()
    );
    for (key, value) in env.overlay() {
        println!("  {key}={value}");
    }

    let (publisher, _rx) = ChannelPublisher::new();
    let server = LanguageServer::new(global, Arc::new(publisher));
    let root = DocumentUri::from_directory_path(&dir)
        .map_err(|()| anyhow::anyhow!("not a local path: {}", dir.display()))?;
    server.add_workspace_root(&root);
    let metadata = server.refresh_metadata(&root).await;

    println!(
        "ansible: {}",
        metadata.ansible_version.as_deref().unwrap_or("not found")
    );
    println!(
        "{}: {}",
        settings.validation.lint.path,
        if metadata.lint_available {
            "available"
        } else {
            "not found"
        }
    );
    for path in &metadata.collections_paths {
        println!("collections: {}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Usage errors exit with status 2 before any logging starts.
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Command::Check(check) => run_check(check).await,
        Command::Env { dir } => run_env(&dir).await,
    }
}
