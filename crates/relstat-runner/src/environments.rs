//! Execution environment management.

use crate::toolcache::RuntimeInstallation;
use relstat_core::Result;
use relstat_core::plan::{CommandSpec, PYTHON};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::info;

/// Trait for execution environments.
#[async_trait::async_trait]
pub trait Environment: Send + Sync {
    /// Prepare the execution environment.
    async fn prepare(&self) -> Result<()>;

    /// Get the working directory.
    fn working_dir(&self) -> &Path;

    /// Cleanup the execution environment.
    async fn cleanup(&self) -> Result<()>;
}

/// Host environment (runs directly on the agent).
///
/// The sources directory is the checkout root; clones land next to it.
pub struct HostEnvironment {
    sources_dir: PathBuf,
}

impl HostEnvironment {
    pub fn new(sources_dir: PathBuf) -> Self {
        Self { sources_dir }
    }
}

#[async_trait::async_trait]
impl Environment for HostEnvironment {
    async fn prepare(&self) -> Result<()> {
        info!(sources_dir = %self.sources_dir.display(), "Preparing host environment");
        tokio::fs::create_dir_all(&self.sources_dir).await.map_err(|e| {
            relstat_core::Error::Internal(format!(
                "Failed to create {}: {}",
                self.sources_dir.display(),
                e
            ))
        })?;
        Ok(())
    }

    fn working_dir(&self) -> &Path {
        &self.sources_dir
    }

    async fn cleanup(&self) -> Result<()> {
        // Clones and the virtualenv are left for inspection; the agent is
        // discarded after the job.
        info!(sources_dir = %self.sources_dir.display(), "Leaving workspace in place");
        Ok(())
    }
}

/// Environment variables shared by every step of a job.
///
/// Starts from the ambient environment; steps add exports, `PATH` entries
/// and the active interpreter.
#[derive(Debug, Clone, Default)]
pub struct JobEnvironment {
    ambient: BTreeMap<String, String>,
    activation: BTreeMap<String, String>,
    exported: BTreeMap<String, String>,
    path_prefix: Vec<PathBuf>,
    interpreter: Option<PathBuf>,
}

impl JobEnvironment {
    pub fn new<I>(ambient: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            ambient: ambient.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Start from the runner's own environment.
    pub fn from_process() -> Self {
        Self::new(std::env::vars())
    }

    pub fn export(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.exported.insert(name.into(), value.into());
    }

    pub fn exported_names(&self) -> BTreeSet<&str> {
        self.exported.keys().map(String::as_str).collect()
    }

    pub fn prepend_path(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        self.path_prefix.retain(|d| d != &dir);
        self.path_prefix.insert(0, dir);
    }

    /// Make an installed runtime the default.
    pub fn activate_runtime(&mut self, runtime: &RuntimeInstallation) {
        self.prepend_path(runtime.bin_dir.clone());
        self.interpreter = Some(runtime.executable.clone());
    }

    /// Activate a virtual environment the way its `activate` script does.
    pub fn activate_venv(&mut self, dir: &Path) {
        let bin = venv_bin_dir(dir);
        self.prepend_path(bin.clone());
        self.activation
            .insert("VIRTUAL_ENV".into(), dir.to_string_lossy().into_owned());
        self.interpreter = Some(bin.join(format!("python{}", std::env::consts::EXE_SUFFIX)));
    }

    /// The command with `python` replaced by the active interpreter.
    pub fn resolve_program(&self, command: &CommandSpec) -> CommandSpec {
        let mut command = command.clone();
        if command.program == PYTHON
            && let Some(interpreter) = &self.interpreter
        {
            command.program = interpreter.to_string_lossy().into_owned();
        }
        command
    }

    /// The full environment for a child process.
    pub fn to_env(&self) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = self.ambient.clone().into_iter().collect();
        env.extend(self.activation.clone());
        env.extend(self.exported.clone());

        if !self.path_prefix.is_empty() {
            let base = self
                .ambient
                .get("PATH")
                .map(|p| std::env::split_paths(p).collect::<Vec<_>>())
                .unwrap_or_default();
            let joined: Option<OsString> =
                std::env::join_paths(self.path_prefix.iter().cloned().chain(base)).ok();
            if let Some(path) = joined {
                env.insert("PATH".into(), path.to_string_lossy().into_owned());
            }
        }
        env
    }
}

fn venv_bin_dir(dir: &Path) -> PathBuf {
    if cfg!(windows) {
        dir.join("Scripts")
    } else {
        dir.join("bin")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn ambient() -> JobEnvironment {
        JobEnvironment::new([
            ("PATH".to_string(), "/usr/bin:/bin".to_string()),
            ("HOME".to_string(), "/home/agent".to_string()),
        ])
    }

    #[test]
    fn test_exports_layer_over_ambient() {
        let mut env = ambient();
        env.export("TOKEN", "t");
        env.export("HOME", "/override");

        let vars = env.to_env();
        assert_eq!(vars["TOKEN"], "t");
        assert_eq!(vars["HOME"], "/override");
        assert_eq!(vars["PATH"], "/usr/bin:/bin");
        assert_eq!(env.exported_names(), BTreeSet::from(["HOME", "TOKEN"]));
    }

    #[test]
    fn test_runtime_then_venv_path_order() {
        let mut env = ambient();
        env.activate_runtime(&RuntimeInstallation {
            name: "python".into(),
            version: "3.8.18".into(),
            bin_dir: PathBuf::from("/opt/hostedtoolcache/Python/3.8.18/x64/bin"),
            executable: PathBuf::from("/opt/hostedtoolcache/Python/3.8.18/x64/bin/python"),
            source: "tool-cache",
        });
        env.activate_venv(Path::new("/agent/venv-sdk"));

        let vars = env.to_env();
        assert_eq!(
            vars["PATH"],
            "/agent/venv-sdk/bin:/opt/hostedtoolcache/Python/3.8.18/x64/bin:/usr/bin:/bin"
        );
        assert_eq!(vars["VIRTUAL_ENV"], "/agent/venv-sdk");
        assert!(env.exported_names().is_empty());
    }

    #[test]
    fn test_resolve_program_uses_interpreter() {
        let mut env = ambient();
        let cmd = CommandSpec::new(PYTHON, "/").arg("main.py");
        assert_eq!(env.resolve_program(&cmd).program, "python");

        env.activate_venv(Path::new("/v"));
        assert_eq!(env.resolve_program(&cmd).program, "/v/bin/python");

        let git = CommandSpec::new("git", "/").arg("status");
        assert_eq!(env.resolve_program(&git).program, "git");
    }

    #[tokio::test]
    async fn test_host_environment_creates_sources_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let sources = tmp.path().join("work/s");
        let host = HostEnvironment::new(sources.clone());

        host.prepare().await.unwrap();
        assert!(sources.is_dir());
        assert_eq!(host.working_dir(), sources.as_path());
        host.cleanup().await.unwrap();
    }
}
