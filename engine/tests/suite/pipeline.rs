//! End-to-end runs against stub Ansible tools.

use std::time::Duration;

use drover_engine::RunState;
use drover_types::{DiagnosticSeverity, LINE_END, Origin, Range, uri_to_path};

use crate::common::{FakeToolchain, MALFORMED, next_publication};

fn syntax_error_report(path: &std::path::Path) -> String {
    format!(
        "ERROR! Syntax Error while loading YAML.\n  mapping values are not allowed in this context\n\n\
         The error appears to be in '{}': line 7, column 19, but may\n\
         be elsewhere in the file depending on the exact syntax problem.\n",
        path.display()
    )
}

#[tokio::test]
async fn lint_enabled_merges_structure_and_lint_findings() {
    let toolchain = FakeToolchain::new();
    let uri = toolchain.document("site.yml", MALFORMED);
    let path = uri_to_path(&uri).unwrap();
    toolchain.lint_reporting(&serde_json::json!([
        {
            "check_name": "load-failure[runtimeerror]",
            "severity": "blocker",
            "level": "error",
            "description": "Failed to load YAML file",
            "url": "https://ansible.readthedocs.io/projects/lint/rules/load-failure/",
            "location": {
                "path": path.display().to_string(),
                "positions": { "begin": { "line": 7, "column": 22 } }
            }
        },
        {
            "check_name": "name[missing]",
            "severity": "minor",
            "description": "All tasks should be named.",
            "location": { "path": "/elsewhere/other.yml", "lines": { "begin": 3 } }
        }
    ]));
    toolchain.syntax_check_failing(&syntax_error_report(&path));

    let (server, mut rx) = toolchain.server(toolchain.global_settings(serde_json::json!({})));
    server.on_document_open(uri.clone(), MALFORMED, 1);
    let publication = next_publication(&mut rx).await;

    assert_eq!(publication.uri, uri);
    assert_eq!(publication.version, 1);
    let structural: Vec<_> = publication
        .diagnostics
        .iter()
        .filter(|d| d.origin() == Origin::Structure)
        .collect();
    assert!(!structural.is_empty());
    assert!(
        structural
            .iter()
            .all(|d| (6..=7).contains(&d.range().start.line))
    );

    let lint: Vec<_> = publication
        .diagnostics
        .iter()
        .filter(|d| d.origin() == Origin::Lint)
        .collect();
    assert_eq!(lint.len(), 1);
    assert_eq!(lint[0].severity(), DiagnosticSeverity::Error);
    assert_eq!(lint[0].range(), Range::on_line(6, 21, LINE_END));
    assert_eq!(lint[0].code(), Some("load-failure[runtimeerror]"));

    assert_eq!(toolchain.calls(), vec!["ansible-lint"]);
    assert_eq!(server.run_state(&uri), RunState::Completed);
    assert!(server.latest_structural_tree(&uri).is_some());
}

#[tokio::test]
async fn lint_disabled_uses_the_syntax_check() {
    let toolchain = FakeToolchain::new();
    let uri = toolchain.document("site.yml", MALFORMED);
    let path = uri_to_path(&uri).unwrap();
    toolchain.lint_reporting(&serde_json::json!([]));
    toolchain.syntax_check_failing(&syntax_error_report(&path));

    let global = toolchain.global_settings(serde_json::json!({
        "validation": { "lint": { "enabled": false } }
    }));
    let (server, mut rx) = toolchain.server(global);
    server.on_document_open(uri.clone(), MALFORMED, 1);
    let publication = next_publication(&mut rx).await;

    let external: Vec<_> = publication
        .diagnostics
        .iter()
        .filter(|d| d.origin() != Origin::Structure)
        .collect();
    assert_eq!(external.len(), 1);
    assert_eq!(external[0].origin(), Origin::SyntaxCheck);
    assert_eq!(external[0].severity(), DiagnosticSeverity::Error);
    assert_eq!(external[0].range(), Range::full_line(6));
    assert!(
        external[0]
            .message()
            .contains("mapping values are not allowed in this context")
    );
    assert_eq!(toolchain.calls(), vec!["ansible-playbook"]);
}

#[tokio::test]
async fn missing_lint_tool_falls_back_to_the_syntax_check() {
    let toolchain = FakeToolchain::new();
    let uri = toolchain.document("site.yml", MALFORMED);
    let path = uri_to_path(&uri).unwrap();
    toolchain.syntax_check_failing(&syntax_error_report(&path));

    let global = toolchain.global_settings(serde_json::json!({
        "validation": { "lint": { "path": "drover-test-missing-lint" } }
    }));
    let (server, mut rx) = toolchain.server(global);
    server.on_document_open(uri, MALFORMED, 1);
    let publication = next_publication(&mut rx).await;

    assert!(
        publication
            .diagnostics
            .iter()
            .any(|d| d.origin() == Origin::SyntaxCheck)
    );
    assert_eq!(toolchain.calls(), vec!["ansible-playbook"]);
}

#[tokio::test]
async fn validation_disabled_clears_and_spawns_nothing() {
    let toolchain = FakeToolchain::new();
    let uri = toolchain.document("site.yml", MALFORMED);
    toolchain.lint_reporting(&serde_json::json!([]));
    toolchain.syntax_check_failing("ERROR! should not run\n");

    let global = toolchain.global_settings(serde_json::json!({
        "validation": { "enabled": false }
    }));
    let (server, mut rx) = toolchain.server(global);
    server.on_document_open(uri.clone(), MALFORMED, 3);
    let publication = next_publication(&mut rx).await;

    assert_eq!(publication.version, 3);
    assert!(publication.diagnostics.is_empty());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());
    assert!(toolchain.calls().is_empty());
}

#[tokio::test]
async fn failing_activation_script_is_reported_once() {
    let toolchain = FakeToolchain::new();
    let uri = toolchain.document("site.yml", "- hosts: all\n  tasks: []\n");
    toolchain.lint_reporting(&serde_json::json!([]));
    let script = toolchain.root().join("activate");
    std::fs::write(&script, "echo 'venv is broken' >&2\nreturn 1\n").unwrap();

    let global = drover_config::SettingsPatch::from_json(serde_json::json!({
        "python": { "activationScript": script.display().to_string() }
    }))
    .unwrap();
    let (server, mut rx) = toolchain.server(global);
    server.on_document_open(uri.clone(), "- hosts: all\n  tasks: []\n", 1);
    let publication = next_publication(&mut rx).await;

    assert_eq!(publication.diagnostics.len(), 1);
    let diagnostic = &publication.diagnostics[0];
    assert_eq!(diagnostic.origin(), Origin::Environment);
    assert_eq!(diagnostic.severity(), DiagnosticSeverity::Error);
    assert!(diagnostic.message().contains("venv is broken"));
    assert_eq!(server.run_state(&uri), RunState::Failed);
    assert!(toolchain.calls().is_empty());
}

#[tokio::test]
async fn quick_edits_publish_only_the_latest_version() {
    let toolchain = FakeToolchain::new();
    let uri = toolchain.document("site.yml", MALFORMED);
    toolchain.lint_reporting(&serde_json::json!([]));

    let (server, mut rx) = toolchain.server(toolchain.global_settings(serde_json::json!({})));
    server.on_document_open(uri.clone(), MALFORMED, 1);
    server.on_document_change(uri.clone(), "- hosts: all\n", 2);
    server.on_document_change(uri.clone(), "- hosts: all\n  tasks: []\n", 3);

    let publication = next_publication(&mut rx).await;
    assert_eq!(publication.version, 3);
    assert!(publication.diagnostics.is_empty());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(toolchain.calls(), vec!["ansible-lint"]);
}

#[tokio::test]
async fn configuration_change_revalidates_open_documents() {
    let toolchain = FakeToolchain::new();
    let uri = toolchain.document("site.yml", MALFORMED);
    let path = uri_to_path(&uri).unwrap();
    toolchain.lint_reporting(&serde_json::json!([]));
    toolchain.syntax_check_failing(&syntax_error_report(&path));

    let (server, mut rx) = toolchain.server(toolchain.global_settings(serde_json::json!({})));
    server.on_document_open(uri.clone(), MALFORMED, 1);
    let first = next_publication(&mut rx).await;
    assert!(first.diagnostics.iter().all(|d| d.origin() != Origin::SyntaxCheck));

    server.on_configuration_change(
        drover_config::ConfigScope::Document(uri.clone()),
        &drover_config::SettingsPatch::from_json(serde_json::json!({
            "validation": { "lint": { "enabled": false } }
        }))
        .unwrap(),
    );
    let second = next_publication(&mut rx).await;
    assert_eq!(second.version, 1);
    assert!(
        second
            .diagnostics
            .iter()
            .any(|d| d.origin() == Origin::SyntaxCheck)
    );
    assert_eq!(toolchain.calls(), vec!["ansible-lint", "ansible-playbook"]);
}

#[tokio::test]
async fn metadata_is_probed_with_the_resolved_environment() {
    let toolchain = FakeToolchain::new();
    let uri = toolchain.document("site.yml", "- hosts: all\n");
    toolchain.tool("ansible", "echo 'ansible [core 2.16.5]'");
    toolchain.tool(
        "ansible-config",
        "echo \"COLLECTIONS_PATHS(default) = ['/opt/collections']\"",
    );

    let (server, _rx) = toolchain.server(toolchain.global_settings(serde_json::json!({})));
    server.add_workspace_root(&drover_types::DocumentUri::from_directory_path(toolchain.root()).unwrap());
    let metadata = server.refresh_metadata(&uri).await;

    assert_eq!(metadata.ansible_version.as_deref(), Some("2.16.5"));
    assert_eq!(
        metadata.collections_paths,
        vec![std::path::PathBuf::from("/opt/collections")]
    );
    assert_eq!(
        server.workspace_metadata(&uri).ansible_version.as_deref(),
        Some("2.16.5")
    );
}

#[tokio::test]
async fn execution_environment_runs_the_tool_inside_the_image() {
    let toolchain = FakeToolchain::new();
    let uri = toolchain.document("site.yml", "- hosts: all\n  tasks: []\n");
    let path = uri_to_path(&uri).unwrap();
    let report = toolchain.root().join("lint.json");
    std::fs::write(
        &report,
        serde_json::json!([{
            "check_name": "yaml[truthy]",
            "severity": "major",
            "description": "Truthy value should be one of [false, true]",
            "location": { "path": path.display().to_string(), "lines": { "begin": 2 } }
        }])
        .to_string(),
    )
    .unwrap();
    toolchain.container_engine("podman", &format!("cat '{}'\nexit 2", report.display()));
    toolchain.lint_reporting(&serde_json::json!([]));

    let global = toolchain.global_settings(serde_json::json!({
        "executionEnvironment": {
            "enabled": true,
            "containerEngine": "podman",
            "image": "quay.io/acme/ee:1"
        }
    }));
    let (server, mut rx) = toolchain.server(global);
    server.on_document_open(uri, "- hosts: all\n  tasks: []\n", 1);
    let publication = next_publication(&mut rx).await;

    let lint: Vec<_> = publication
        .diagnostics
        .iter()
        .filter(|d| d.origin() == Origin::Lint)
        .collect();
    assert_eq!(lint.len(), 1);
    assert_eq!(lint[0].code(), Some("yaml[truthy]"));

    let calls = toolchain.calls();
    assert_eq!(calls.len(), 1, "only the engine runs: {calls:?}");
    let call = &calls[0];
    let dir = path.parent().unwrap().display().to_string();
    assert!(call.starts_with("podman run --rm"), "{call}");
    assert!(call.contains(&format!("--volume {dir}:{dir}")), "{call}");
    assert!(call.contains("quay.io/acme/ee:1 ansible-lint"), "{call}");
}
