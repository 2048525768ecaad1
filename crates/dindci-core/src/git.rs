//! Thin wrapper over the git CLI

use crate::{CiError, Result};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A git invocation context: working directory plus extra environment.
#[derive(Debug, Clone)]
pub struct Git {
    dir: PathBuf,
    envs: Vec<(OsString, OsString)>,
}

impl Git {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            envs: Vec::new(),
        }
    }

    #[must_use]
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_owned(), value.as_ref().to_owned()));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run `git <args>` and return stdout without trailing whitespace. Non-zero exit is a
    /// collaborator failure.
    pub fn run<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<String> {
        let subcommand = args
            .first()
            .map(|s| s.as_ref().to_string_lossy().into_owned())
            .unwrap_or_default();
        let context = format!("git {subcommand}");

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to start git");
                CiError::Collaborator {
                    context: context.clone(),
                    program: "git".into(),
                    code: crate::process::SPAWN_FAILURE_CODE,
                }
            })?;

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            tracing::error!(
                dir = %self.dir.display(),
                %context,
                code,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "git failed"
            );
            return Err(CiError::Collaborator {
                context,
                program: "git".into(),
                code,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    /// Clone `source` (a local path, never a network remote) into `dest`.
    pub fn clone_local(source: &Path, dest: &Path) -> Result<Self> {
        let parent = dest
            .parent()
            .ok_or_else(|| CiError::Config(format!("invalid clone target {}", dest.display())))?;
        std::fs::create_dir_all(parent)?;
        tracing::info!(source = %source.display(), dest = %dest.display(), "cloning");
        Self::new(parent).run(&[
            OsStr::new("clone"),
            OsStr::new("--quiet"),
            OsStr::new("--no-hardlinks"),
            source.as_os_str(),
            dest.as_os_str(),
        ])?;
        Ok(Self::new(dest))
    }

    pub fn checkout_detached(&self, commit: &str) -> Result<()> {
        tracing::info!(commit, "checking out");
        self.run(&["checkout", "--quiet", "--detach", commit])?;
        Ok(())
    }

    pub fn rev_parse(&self, rev: &str) -> Result<String> {
        self.run(&["rev-parse", rev])
    }

    pub fn head_commit(&self) -> Result<String> {
        self.rev_parse("HEAD")
    }

    /// Tree object of the checked-out commit.
    pub fn head_tree(&self) -> Result<String> {
        self.rev_parse("HEAD^{tree}")
    }

    /// Whether `rev` names an existing object.
    pub fn verify(&self, rev: &str) -> bool {
        self.run(&["rev-parse", "--verify", "--quiet", rev]).is_ok()
    }

    pub fn status_porcelain(&self) -> Result<String> {
        self.run(&["status", "--porcelain"])
    }

    pub fn toplevel(&self) -> Result<PathBuf> {
        self.run(&["rev-parse", "--show-toplevel"]).map(PathBuf::from)
    }

    /// Absolute path of a file inside the git directory (e.g. `index`).
    pub fn git_path(&self, name: &str) -> Result<PathBuf> {
        let path = PathBuf::from(self.run(&["rev-parse", "--git-path", name])?);
        Ok(if path.is_absolute() {
            path
        } else {
            self.dir.join(path)
        })
    }

    pub fn git_dir(&self) -> Result<PathBuf> {
        let path = PathBuf::from(self.run(&["rev-parse", "--git-dir"])?);
        Ok(if path.is_absolute() {
            path
        } else {
            self.dir.join(path)
        })
    }

    pub fn add_all(&self) -> Result<()> {
        self.run(&["add", "-A"])?;
        Ok(())
    }

    pub fn write_tree(&self) -> Result<String> {
        self.run(&["write-tree"])
    }

    pub fn commit_tree(&self, tree: &str, parent: &str, message: &str) -> Result<String> {
        self.run(&["commit-tree", tree, "-p", parent, "-m", message])
    }

    pub fn update_ref(&self, name: &str, commit: &str) -> Result<()> {
        self.run(&["update-ref", name, commit])?;
        Ok(())
    }

    pub fn delete_ref(&self, name: &str) -> Result<()> {
        self.run(&["update-ref", "-d", name])?;
        Ok(())
    }
}

/// Paths named by `git status --porcelain` output.
///
/// Renames (`R  old -> new`) report the new path.
pub fn changed_paths(porcelain: &str) -> Vec<String> {
    porcelain
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let path = &line[3..];
            path.rsplit_once(" -> ")
                .map_or(path, |(_, new)| new)
                .to_string()
        })
        .collect()
}
