//! Locating language runtimes on the agent.
//!
//! Hosted agents keep pre-installed runtimes in a tool cache laid out as
//! `<cache>/<Tool>/<version>/<arch>/`. When no cached build matches, the
//! `PATH` is searched for a suitable interpreter instead.

use relstat_core::pipeline::{Architecture, RuntimeSpec};
use relstat_core::{Error, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// A runtime that can be put on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInstallation {
    pub name: String,
    pub version: String,
    pub bin_dir: PathBuf,
    pub executable: PathBuf,
    /// `tool-cache` or `path`.
    pub source: &'static str,
}

/// Finds runtimes in the tool cache, falling back to `PATH`.
#[derive(Debug, Clone)]
pub struct RuntimeLocator {
    tool_cache: Option<PathBuf>,
    search_path: Option<OsString>,
}

impl RuntimeLocator {
    pub fn new(tool_cache: Option<PathBuf>) -> Self {
        Self {
            tool_cache,
            search_path: std::env::var_os("PATH"),
        }
    }

    /// Use the cache directory advertised by the agent, if any.
    pub fn from_env() -> Self {
        let tool_cache = std::env::var_os("AGENT_TOOLSDIRECTORY")
            .or_else(|| std::env::var_os("RUNNER_TOOL_CACHE"))
            .map(PathBuf::from);
        Self::new(tool_cache)
    }

    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    pub async fn locate(&self, spec: &RuntimeSpec) -> Result<RuntimeInstallation> {
        if let Some(cache) = &self.tool_cache {
            if let Some(found) = self.locate_cached(cache, spec).await? {
                info!(
                    runtime = %spec.name,
                    version = %found.version,
                    bin_dir = %found.bin_dir.display(),
                    "Using runtime from tool cache"
                );
                return Ok(found);
            }
            debug!(cache = %cache.display(), runtime = %spec.name, "No cached runtime matched");
        }

        // Interpreters on PATH are always built for the host.
        if spec.architecture.is_host()
            && let Some(found) = self.locate_on_path(spec).await
        {
            info!(
                runtime = %spec.name,
                version = %found.version,
                executable = %found.executable.display(),
                "Using runtime from PATH"
            );
            return Ok(found);
        }

        Err(Error::RuntimeNotFound {
            name: spec.name.clone(),
            version: spec.version.clone(),
            arch: spec.architecture.to_string(),
        })
    }

    async fn locate_cached(
        &self,
        cache: &Path,
        spec: &RuntimeSpec,
    ) -> Result<Option<RuntimeInstallation>> {
        let tool_dir = cache.join(cache_tool_name(&spec.name));
        let mut entries = match tokio::fs::read_dir(&tool_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut best: Option<(Vec<u64>, String, PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let version = entry.file_name().to_string_lossy().into_owned();
            if !version_matches(&version, &spec.version) {
                continue;
            }
            let arch_dir = entry.path().join(spec.architecture.as_str());
            if !is_file(&cached_executable(&arch_dir, &spec.name)).await {
                continue;
            }
            let key = version_key(&version);
            if best.as_ref().is_none_or(|(k, _, _)| key > *k) {
                best = Some((key, version, arch_dir));
            }
        }

        Ok(best.map(|(_, version, arch_dir)| RuntimeInstallation {
            name: spec.name.clone(),
            version,
            bin_dir: cached_bin_dir(&arch_dir),
            executable: cached_executable(&arch_dir, &spec.name),
            source: "tool-cache",
        }))
    }

    async fn locate_on_path(&self, spec: &RuntimeSpec) -> Option<RuntimeInstallation> {
        let search_path = self.search_path.as_ref()?;
        let major = spec.version.split('.').next().unwrap_or_default();
        let candidates = [
            format!("{}{}", spec.name, spec.version),
            format!("{}{}", spec.name, major),
            spec.name.clone(),
        ];

        for dir in std::env::split_paths(search_path) {
            for candidate in &candidates {
                let executable = dir.join(format!("{}{}", candidate, std::env::consts::EXE_SUFFIX));
                if !is_file(&executable).await {
                    continue;
                }
                let Some(version) = query_version(&executable).await else {
                    continue;
                };
                if version_matches(&version, &spec.version) {
                    return Some(RuntimeInstallation {
                        name: spec.name.clone(),
                        version,
                        bin_dir: dir.clone(),
                        executable,
                        source: "path",
                    });
                }
                debug!(executable = %executable.display(), %version, "Version does not match");
            }
        }
        None
    }
}

/// Whether `version` satisfies a requested prefix such as `3.8`.
///
/// Components are compared whole, so `3.80` does not satisfy `3.8`.
pub fn version_matches(version: &str, requested: &str) -> bool {
    let have: Vec<&str> = version.trim().split('.').collect();
    let want: Vec<&str> = requested.trim().split('.').filter(|p| *p != "x").collect();
    !want.is_empty() && want.len() <= have.len() && want.iter().zip(&have).all(|(w, h)| w == h)
}

fn version_key(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| {
            part.chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
                .parse()
                .unwrap_or(0)
        })
        .collect()
}

fn cache_tool_name(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn cached_bin_dir(arch_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        arch_dir.to_path_buf()
    } else {
        arch_dir.join("bin")
    }
}

fn cached_executable(arch_dir: &Path, name: &str) -> PathBuf {
    cached_bin_dir(arch_dir).join(format!("{}{}", name, std::env::consts::EXE_SUFFIX))
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Run `<executable> --version` and take the last word of its output.
async fn query_version(executable: &Path) -> Option<String> {
    let output = Command::new(executable)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    // Older interpreters print the version on stderr.
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    text.split_whitespace().last().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(version: &str, architecture: Architecture) -> RuntimeSpec {
        RuntimeSpec {
            name: "python".into(),
            version: version.into(),
            architecture,
        }
    }

    fn host_architecture() -> Option<Architecture> {
        [Architecture::X64, Architecture::X86, Architecture::Arm64]
            .into_iter()
            .find(Architecture::is_host)
    }

    fn install_cached(cache: &Path, version: &str, arch: &str) {
        let arch_dir = cache.join("Python").join(version).join(arch);
        let bin = cached_bin_dir(&arch_dir);
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join(format!("python{}", std::env::consts::EXE_SUFFIX)), "").unwrap();
    }

    #[test]
    fn test_version_matches() {
        assert!(version_matches("3.8.12", "3.8"));
        assert!(version_matches("3.8.12", "3.8.12"));
        assert!(version_matches("3.8.12", "3.x"));
        assert!(!version_matches("3.80.1", "3.8"));
        assert!(!version_matches("3.9.1", "3.8"));
        assert!(!version_matches("3", "3.8"));
        assert!(!version_matches("3.8.1", ""));
    }

    #[test]
    fn test_version_key_orders_numerically() {
        assert!(version_key("3.8.18") > version_key("3.8.9"));
        assert!(version_key("3.10.0") > version_key("3.9.7"));
        assert_eq!(version_key("3.8.0rc1"), vec![3, 8, 0]);
    }

    #[tokio::test]
    async fn test_tool_cache_picks_highest_matching_version() {
        let cache = tempfile::tempdir().unwrap();
        install_cached(cache.path(), "3.8.9", "x64");
        install_cached(cache.path(), "3.8.18", "x64");
        install_cached(cache.path(), "3.9.1", "x64");
        install_cached(cache.path(), "3.8.20", "arm64");

        let locator =
            RuntimeLocator::new(Some(cache.path().to_path_buf())).with_search_path("");
        let found = locator.locate(&spec("3.8", Architecture::X64)).await.unwrap();

        assert_eq!(found.version, "3.8.18");
        assert_eq!(found.source, "tool-cache");
        assert!(found.bin_dir.starts_with(cache.path().join("Python/3.8.18/x64")));
        assert!(found.executable.starts_with(&found.bin_dir));
    }

    #[tokio::test]
    async fn test_missing_runtime_is_an_error() {
        let cache = tempfile::tempdir().unwrap();
        install_cached(cache.path(), "3.9.1", "x64");

        let locator =
            RuntimeLocator::new(Some(cache.path().to_path_buf())).with_search_path("");
        let err = locator
            .locate(&spec("3.8", Architecture::X64))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RuntimeNotFound { ref version, ref arch, .. } if version == "3.8" && arch == "x64"
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_path_fallback_checks_version() {
        use std::os::unix::fs::PermissionsExt;

        let Some(host) = host_architecture() else {
            return;
        };

        let dir = tempfile::tempdir().unwrap();
        let write_stub = |name: &str, version: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\necho 'Python {}'\n", version)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        };
        write_stub("python3.8", "3.8.12");
        write_stub("python", "3.11.4");

        let locator = RuntimeLocator::new(None).with_search_path(dir.path().as_os_str());

        let found = locator.locate(&spec("3.8", host)).await.unwrap();
        assert_eq!(found.version, "3.8.12");
        assert_eq!(found.source, "path");
        assert_eq!(found.executable, dir.path().join("python3.8"));

        let found = locator.locate(&spec("3.11", host)).await.unwrap();
        assert_eq!(found.executable, dir.path().join("python"));

        assert!(locator.locate(&spec("2.7", host)).await.is_err());
    }
}
