//! Execution environments: running tools inside a container image.
//!
//! The wrapped command bind-mounts the directories the tool needs at the
//! same paths inside the container, so file paths in its output still name
//! host files.

use std::path::{Path, PathBuf};

use drover_config::ExecutionEnvironmentSettings;
use drover_types::{EnvOverlay, with_color_overrides};

use crate::runner::ProcessRequest;

/// A located container engine and the image to run tools in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRuntime {
    engine: PathBuf,
    image: String,
}

impl ContainerRuntime {
    #[must_use]
    pub fn new(engine: impl Into<PathBuf>, image: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            image: image.into(),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &Path {
        &self.engine
    }

    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Rewrite `request` to run inside the image.
    ///
    /// `mounts` are bind-mounted read-write at their host paths; nested
    /// duplicates are skipped. The tool's overlay is passed with `--env`, and
    /// the engine itself runs with the inherited environment.
    #[must_use]
    pub fn wrap(&self, request: ProcessRequest, mounts: &[&Path]) -> ProcessRequest {
        let mut args = vec!["run".to_string(), "--rm".to_string()];

        let mut mounted: Vec<&Path> = Vec::new();
        let mut sorted = mounts.to_vec();
        sorted.sort_by_key(|path| path.components().count());
        for path in sorted {
            if mounted.iter().any(|outer| path.starts_with(outer)) {
                continue;
            }
            mounted.push(path);
            let host = path.to_string_lossy();
            args.push("--volume".to_string());
            args.push(format!("{host}:{host}"));
        }

        if let Some(dir) = &request.working_dir {
            args.push("--workdir".to_string());
            args.push(dir.to_string_lossy().into_owned());
        }
        for (key, value) in &with_color_overrides(request.env.clone()) {
            if key == "PATH" || key == "VIRTUAL_ENV" {
                continue;
            }
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(self.image.clone());
        args.push(request.executable);
        args.extend(request.args);

        ProcessRequest {
            executable: self.engine.to_string_lossy().into_owned(),
            args,
            env: EnvOverlay::new(),
            inherit_env: true,
            timeout: request.timeout,
            working_dir: request.working_dir,
        }
    }
}

/// First engine candidate found on `search_path`.
pub(crate) fn locate_engine(
    settings: &ExecutionEnvironmentSettings,
    search_path: Option<&str>,
) -> Option<ContainerRuntime> {
    settings
        .container_engine
        .candidates()
        .iter()
        .find_map(|name| crate::environment::locate_in(name, search_path))
        .map(|engine| ContainerRuntime::new(engine, settings.image.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn wrap_mounts_runs_the_image_and_forwards_the_overlay() {
        let runtime = ContainerRuntime::new("/usr/bin/podman", "quay.io/acme/ee:1");
        let mut env = EnvOverlay::new();
        env.insert("PATH".into(), "/venv/bin:/usr/bin".into());
        env.insert("ANSIBLE_CONFIG".into(), "/srv/play/ansible.cfg".into());
        let request = ProcessRequest::new("ansible-lint", Duration::from_secs(30))
            .args(["-f", "codeclimate", "/srv/play/site.yml"])
            .env(env)
            .working_dir("/srv/play");

        let wrapped = runtime.wrap(
            request,
            &[Path::new("/srv/play/roles"), Path::new("/srv/play")],
        );

        assert_eq!(wrapped.executable, "/usr/bin/podman");
        assert_eq!(wrapped.timeout, Duration::from_secs(30));
        assert!(wrapped.env.is_empty());
        assert!(wrapped.inherit_env);
        assert_eq!(wrapped.working_dir, Some(PathBuf::from("/srv/play")));

        let args = wrapped.args.join(" ");
        assert!(args.starts_with("run --rm --volume /srv/play:/srv/play --workdir /srv/play "));
        assert!(!args.contains("/srv/play/roles:"));
        assert!(args.contains("--env ANSIBLE_CONFIG=/srv/play/ansible.cfg"));
        assert!(args.contains("--env NO_COLOR=1"));
        assert!(!args.contains("PATH="));
        assert!(args.ends_with("quay.io/acme/ee:1 ansible-lint -f codeclimate /srv/play/site.yml"));
    }

    #[cfg(unix)]
    #[test]
    fn engine_is_found_in_candidate_order() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        for name in ["docker", "podman"] {
            let path = dir.path().join(name);
            std::fs::write(&path, "#!/bin/sh\n").unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let search_path = dir.path().to_string_lossy().into_owned();

        let mut settings = ExecutionEnvironmentSettings::default();
        let runtime = locate_engine(&settings, Some(&search_path)).unwrap();
        assert_eq!(runtime.engine(), dir.path().join("podman"));
        assert_eq!(runtime.image(), settings.image);

        settings.container_engine = drover_config::ContainerEngine::Docker;
        let runtime = locate_engine(&settings, Some(&search_path)).unwrap();
        assert_eq!(runtime.engine(), dir.path().join("docker"));

        assert!(locate_engine(&settings, Some("/nonexistent")).is_none());
    }
}
