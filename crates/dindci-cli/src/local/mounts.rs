//! Read-only repository mounts for the CI container
//!
//! A main checkout is mounted at `<base>/src-git-repo`. A linked worktree
//! also needs its common git dir, so both are mounted below `<base>` at the
//! same positions relative to their common ancestor. When the worktree's
//! `.git` file points at an absolute host path, a rewritten `.git` with a
//! relative pointer is mounted over it.

use dindci_core::git::Git;
use dindci_core::{CiError, Result};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

pub const MOUNT_BASE: &str = "/home/dockeruser/src-git";
const MAIN_CHECKOUT: &str = "src-git-repo";
const OVERLAY_FILE: &str = ".git-overlay";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: PathBuf,
}

impl Mount {
    fn volume_arg(&self) -> String {
        format!("{}:{}:ro", self.host.display(), self.container.display())
    }
}

/// Where a linked worktree keeps its objects and refs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedGitDir {
    pub common_dir: PathBuf,
    /// The worktree's `gitdir:` line names an absolute path
    pub absolute_pointer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPlan {
    pub worktree: Mount,
    pub git_dir: Option<Mount>,
    /// Contents of the `.git` file to mount over the worktree's own
    pub overlay: Option<String>,
}

impl MountPlan {
    pub fn new(repo: &Path, linked: Option<&LinkedGitDir>) -> Self {
        let base = Path::new(MOUNT_BASE);
        let Some(linked) = linked else {
            return Self {
                worktree: Mount {
                    host: repo.to_path_buf(),
                    container: base.join(MAIN_CHECKOUT),
                },
                git_dir: None,
                overlay: None,
            };
        };

        let ancestor = common_ancestor(repo, &linked.common_dir);
        let inside = |path: &Path| base.join(path.strip_prefix(&ancestor).unwrap_or(path));
        let overlay = linked.absolute_pointer.then(|| {
            let pointer = relative_path(repo, &linked.common_dir);
            format!("gitdir: {}\n", pointer.display())
        });
        Self {
            worktree: Mount {
                host: repo.to_path_buf(),
                container: inside(repo),
            },
            git_dir: Some(Mount {
                host: linked.common_dir.clone(),
                container: inside(&linked.common_dir),
            }),
            overlay,
        }
    }

    /// The repository as seen inside the container
    pub fn source(&self) -> &Path {
        &self.worktree.container
    }

    /// Where `dindci test --source <source>` clones to inside the container
    pub fn clone_dir(&self, home: &Path) -> PathBuf {
        let name = self
            .worktree
            .container
            .file_name()
            .unwrap_or_else(|| OsStr::new(MAIN_CHECKOUT));
        home.join("git_repos").join(name)
    }

    /// Write the overlay `.git` into `dir`, if this plan needs one.
    pub fn write_overlay(&self, dir: &Path) -> Result<Option<PathBuf>> {
        let Some(contents) = &self.overlay else {
            return Ok(None);
        };
        let path = dir.join(OVERLAY_FILE);
        std::fs::write(&path, contents)?;
        Ok(Some(path))
    }

    /// `-v` arguments for `docker run`
    pub fn volume_args(&self, overlay_file: Option<&Path>) -> Vec<String> {
        let mut args = vec!["-v".to_string(), self.worktree.volume_arg()];
        if let Some(git_dir) = &self.git_dir {
            args.push("-v".into());
            args.push(git_dir.volume_arg());
        }
        if let Some(file) = overlay_file {
            args.push("-v".into());
            args.push(
                Mount {
                    host: file.to_path_buf(),
                    container: self.worktree.container.join(".git"),
                }
                .volume_arg(),
            );
        }
        args
    }
}

/// Inspect `repo/.git`: `None` for a main checkout, the common git dir for a
/// linked worktree.
pub fn detect(repo: &Path) -> Result<Option<LinkedGitDir>> {
    let pointer = repo.join(".git");
    if pointer.is_dir() {
        return Ok(None);
    }
    if !pointer.is_file() {
        return Err(CiError::Config(format!(
            "expected {} to be a file or directory",
            pointer.display()
        )));
    }

    let contents = std::fs::read_to_string(&pointer)?;
    let target = parse_gitdir(&contents).ok_or_else(|| {
        CiError::Config(format!("no `gitdir:` line in {}", pointer.display()))
    })?;

    let common = Git::new(repo).run(&["rev-parse", "--git-common-dir"])?;
    let common_dir = std::fs::canonicalize(repo.join(common))?;
    tracing::debug!(common_dir = %common_dir.display(), "linked worktree");
    Ok(Some(LinkedGitDir {
        common_dir,
        absolute_pointer: target.is_absolute(),
    }))
}

fn parse_gitdir(contents: &str) -> Option<PathBuf> {
    contents
        .lines()
        .find_map(|line| line.strip_prefix("gitdir:"))
        .map(|target| PathBuf::from(target.trim()))
}

fn common_ancestor(a: &Path, b: &Path) -> PathBuf {
    a.components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect()
}

/// `to` expressed relative to the directory `from`
fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let shared = common_ancestor(from, to).components().count();
    let ups = from.components().skip(shared).map(|_| Component::ParentDir);
    let downs = to.components().skip(shared);
    let path: PathBuf = ups.chain(downs).collect();
    if path.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        path
    }
}
