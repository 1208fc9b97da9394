//! Fake toolchain fixtures.
//!
//! Each fixture is a temporary virtual environment whose `bin/` holds a
//! stub `python3` and shell-script stand-ins for the Ansible tools. Every
//! stub appends its name to `calls.log` so tests can assert what ran.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use drover_config::SettingsPatch;
use drover_engine::{ChannelPublisher, CoordinatorConfig, LanguageServer, Publication};
use drover_process::{AmbientEnv, EnvironmentResolver, ProcessRunner};
use drover_types::{DocumentUri, EnvOverlay};
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const MALFORMED: &str = "\
---
- name: Invalid playbook
  hosts: localhost
  tasks:
    - name: Show a message
      ansible.builtin.debug:
        msg: hello: world
foobar: test
";

pub struct FakeToolchain {
    dir: TempDir,
}

impl FakeToolchain {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("bin")).unwrap();
        std::fs::create_dir(dir.path().join("engines")).unwrap();
        let toolchain = Self { dir };
        toolchain.tool("python3", "exit 0");
        toolchain
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn bin(&self) -> PathBuf {
        self.root().join("bin")
    }

    pub fn interpreter(&self) -> PathBuf {
        self.bin().join("python3")
    }

    /// Install `bin/<name>` running `body` after logging the call.
    pub fn tool(&self, name: &str, body: &str) {
        let path = self.bin().join(name);
        let log = self.root().join("calls.log");
        let script = format!(
            "#!/bin/sh\necho {name} >> '{}'\n{body}\n",
            log.display()
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// A container engine on the ambient `PATH` that logs its arguments and
    /// then runs `body`.
    pub fn container_engine(&self, name: &str, body: &str) {
        let path = self.root().join("engines").join(name);
        let log = self.root().join("calls.log");
        let script = format!(
            "#!/bin/sh\necho {name} \"$@\" >> '{}'\n{body}\n",
            log.display()
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// `ansible-lint` printing `report` as its codeclimate output.
    pub fn lint_reporting(&self, report: &serde_json::Value) {
        let json = self.root().join("lint.json");
        std::fs::write(&json, report.to_string()).unwrap();
        self.tool("ansible-lint", &format!("cat '{}'\nexit 2", json.display()));
    }

    /// `ansible-playbook` failing with `stderr`.
    pub fn syntax_check_failing(&self, stderr: &str) {
        let text = self.root().join("syntax.txt");
        std::fs::write(&text, stderr).unwrap();
        self.tool(
            "ansible-playbook",
            &format!("cat '{}' >&2\nexit 4", text.display()),
        );
    }

    /// Write a playbook under the fixture and return its uri.
    pub fn document(&self, name: &str, text: &str) -> DocumentUri {
        let path = self.root().join(name);
        std::fs::write(&path, text).unwrap();
        DocumentUri::from_file_path(&path).unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.root().join("calls.log"))
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Global settings pointing at the stub interpreter.
    pub fn global_settings(&self, extra: serde_json::Value) -> SettingsPatch {
        let mut value = serde_json::json!({
            "python": { "interpreterPath": self.interpreter().display().to_string() }
        });
        if let (Some(base), serde_json::Value::Object(extra)) = (value.as_object_mut(), extra) {
            base.extend(extra);
        }
        SettingsPatch::from_json(value).unwrap()
    }

    /// A server whose tools resolve only inside this fixture.
    pub fn server(
        &self,
        global: SettingsPatch,
    ) -> (LanguageServer, mpsc::UnboundedReceiver<Publication>) {
        let mut ambient = EnvOverlay::new();
        ambient.insert(
            "PATH".to_string(),
            format!("{}:/usr/bin:/bin", self.root().join("engines").display()),
        );
        let resolver =
            EnvironmentResolver::new(ProcessRunner::new()).with_ambient(AmbientEnv::Fixed(ambient));
        let (publisher, rx) = ChannelPublisher::new();
        let server = LanguageServer::with_resolver(
            global,
            Arc::new(publisher),
            resolver,
            CoordinatorConfig {
                debounce: Duration::from_millis(20),
            },
        );
        (server, rx)
    }
}

pub async fn next_publication(rx: &mut mpsc::UnboundedReceiver<Publication>) -> Publication {
    tokio::time::timeout(Duration::from_secs(20), rx.recv())
        .await
        .expect("publication within 20s")
        .expect("publisher alive")
}
