//! Entrypoint and harness configuration

use crate::{CiError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Account the harness runs as and the entrypoint hands off to by default.
pub const DEFAULT_SERVICE_USER: &str = "dockeruser";

/// Group granted when the socket's gid has no name inside the container.
pub const DEFAULT_FALLBACK_GROUP: &str = "root";

/// Environment variable that marks a container as CI-capable.
pub const DEFAULT_CI_MARKER: &str = "DINDCI_CONTAINER";

/// Configuration for the entrypoint privilege resolver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrypointConfig {
    /// Docker daemon control socket whose group is mapped into the container
    pub socket_path: PathBuf,

    /// Unprivileged account that receives the socket group
    pub service_user: String,

    /// Group used when the socket gid does not resolve to a name
    pub fallback_group: String,
}

impl Default for EntrypointConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            service_user: default_service_user(),
            fallback_group: DEFAULT_FALLBACK_GROUP.into(),
        }
    }
}

impl EntrypointConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> EntrypointConfigBuilder {
        EntrypointConfigBuilder::default()
    }
}

/// Builder for `EntrypointConfig`
#[derive(Debug, Default)]
pub struct EntrypointConfigBuilder {
    config: EntrypointConfig,
}

impl EntrypointConfigBuilder {
    #[must_use]
    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.socket_path = path.into();
        self
    }

    #[must_use]
    pub fn service_user(mut self, name: impl Into<String>) -> Self {
        self.config.service_user = name.into();
        self
    }

    #[must_use]
    pub fn fallback_group(mut self, name: impl Into<String>) -> Self {
        self.config.fallback_group = name.into();
        self
    }

    #[must_use]
    pub fn build(self) -> EntrypointConfig {
        self.config
    }
}

/// Get default socket path from DINDCI_DOCKER_SOCKET env var or system default
///
/// Returns:
/// - `$DINDCI_DOCKER_SOCKET` if set
/// - `/var/run/docker.sock` otherwise
pub fn default_socket_path() -> PathBuf {
    std::env::var("DINDCI_DOCKER_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/run/docker.sock"))
}

/// Get the service account from DINDCI_SERVICE_USER or `dockeruser`
pub fn default_service_user() -> String {
    std::env::var("DINDCI_SERVICE_USER").unwrap_or_else(|_| DEFAULT_SERVICE_USER.into())
}

/// Configuration for one harness run, optionally loaded from TOML.
///
/// Every field has a default, so an empty file (or no file) yields the stock
/// uv-based pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Variable that must be set for the harness to proceed
    pub ci_marker_var: String,

    /// Account the harness must be running as
    pub service_user: String,

    /// Primary clone location; `$HOME/git_repos/<source dir name>` when unset
    pub clone_dir: Option<PathBuf>,

    /// Packaging clone location; `<clone_dir>-packaging` when unset
    pub packaging_clone_dir: Option<PathBuf>,

    /// Project directory inside each clone where the pipeline runs
    pub project_subdir: PathBuf,

    /// Reports directory, relative to the project directory
    pub reports_dir: PathBuf,

    /// Build output directory, relative to the project directory
    pub dist_dir: PathBuf,

    /// External collaborator commands
    pub commands: CommandSet,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            ci_marker_var: DEFAULT_CI_MARKER.into(),
            service_user: DEFAULT_SERVICE_USER.into(),
            clone_dir: None,
            packaging_clone_dir: None,
            project_subdir: PathBuf::from("."),
            reports_dir: PathBuf::from("reports"),
            dist_dir: PathBuf::from("dist"),
            commands: CommandSet::default(),
        }
    }
}

impl HarnessConfig {
    /// Load from a TOML file, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            CiError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&text)
            .map_err(|e| CiError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Where the primary clone of `source` goes.
    pub fn resolve_clone_dir(&self, source: &Path) -> Result<PathBuf> {
        if let Some(dir) = &self.clone_dir {
            return Ok(dir.clone());
        }
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| CiError::Config("HOME is not set and no clone_dir given".into()))?;
        let name = source.file_name().ok_or_else(|| {
            CiError::Config(format!("cannot derive a clone name from {}", source.display()))
        })?;
        Ok(home.join("git_repos").join(name))
    }

    /// Where the independent packaging clone goes.
    pub fn resolve_packaging_clone_dir(&self, clone_dir: &Path) -> PathBuf {
        self.packaging_clone_dir.clone().unwrap_or_else(|| {
            let mut name = clone_dir.as_os_str().to_owned();
            name.push("-packaging");
            PathBuf::from(name)
        })
    }
}

/// Argument vectors for every external collaborator the pipeline calls.
///
/// Arguments may contain `{reports}`, `{dist}`, `{venv}`, `{python}`,
/// `{wheel}` and `{workspace}`, expanded per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandSet {
    pub sync: Vec<String>,
    pub lint: Vec<String>,
    pub build: Vec<String>,
    pub create_venv: Vec<String>,
    pub install: Vec<String>,
    pub sanity: Vec<String>,
    /// Auxiliary suite; empty means there is none
    pub aux_tests: Vec<String>,
    pub tests: Vec<String>,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            sync: argv(&["uv", "sync", "--all-groups"]),
            lint: argv(&["uv", "run", "fflint"]),
            build: argv(&["uv", "build", "--out-dir", "{dist}"]),
            create_venv: argv(&["uv", "venv", "--no-project", "{venv}"]),
            install: argv(&["uv", "pip", "install", "--python", "{python}", "{wheel}"]),
            sanity: argv(&["{python}", "resources/test_install.py"]),
            aux_tests: argv(&[
                "uv",
                "run",
                "pytest",
                "devenv-test",
                "--junitxml={reports}/devenv-test-junit.xml",
            ]),
            tests: argv(&[
                "uv",
                "run",
                "pytest",
                "--cov",
                "--cov-branch",
                "--cov-report=term",
                "--cov-report=xml:{reports}/coverage.xml",
                "--cov-report=html:{reports}/htmlcov",
                "--junitxml={reports}/junit.xml",
            ]),
        }
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = EntrypointConfig::builder()
            .socket_path("/tmp/docker.sock")
            .service_user("ci")
            .build();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/docker.sock"));
        assert_eq!(config.service_user, "ci");
        assert_eq!(config.fallback_group, DEFAULT_FALLBACK_GROUP);
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let config: HarnessConfig = toml::from_str(
            r#"
            service_user = "builder"
            [commands]
            lint = ["make", "lint"]
            "#,
        )
        .unwrap();
        assert_eq!(config.service_user, "builder");
        assert_eq!(config.ci_marker_var, DEFAULT_CI_MARKER);
        assert_eq!(config.commands.lint, vec!["make", "lint"]);
        assert_eq!(config.commands.sync, CommandSet::default().sync);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed: std::result::Result<HarnessConfig, _> = toml::from_str("colour = 1");
        assert!(parsed.is_err());
    }

    #[test]
    fn packaging_clone_sits_next_to_primary() {
        let config = HarnessConfig::default();
        assert_eq!(
            config.resolve_packaging_clone_dir(Path::new("/w/repo")),
            PathBuf::from("/w/repo-packaging")
        );
    }

    #[test]
    fn explicit_clone_dir_wins() {
        let config = HarnessConfig {
            clone_dir: Some(PathBuf::from("/scratch/clone")),
            ..HarnessConfig::default()
        };
        assert_eq!(
            config.resolve_clone_dir(Path::new("/src/repo")).unwrap(),
            PathBuf::from("/scratch/clone")
        );
    }
}
