//! Working-tree snapshots
//!
//! The harness only ever tests commits. To test uncommitted work, the host
//! writes the working tree as a tree object through a throwaway index and,
//! if it differs from HEAD, wraps it in a commit reachable from a temporary
//! branch so a local clone picks it up.

use crate::git::Git;
use crate::{CiError, Result};
use std::path::Path;

/// Branch that keeps a snapshot commit reachable during a local clone.
pub const SNAPSHOT_REF: &str = "refs/heads/__ci_working_tree__";

/// Tree hash of the working directory, tracked and untracked files included,
/// without touching the real index.
///
/// With `ephemeral`, new objects go to a temporary object directory and are
/// discarded afterwards; the printed hash may then not resolve later.
pub fn working_tree_hash(repo: &Path, ephemeral: bool) -> Result<String> {
    let git = Git::new(repo);
    if git.status_porcelain()?.is_empty() {
        return git.write_tree();
    }

    let scratch = tempfile::tempdir()?;
    let index = scratch.path().join("index");
    let real_index = git.git_path("index")?;
    if real_index.is_file() {
        std::fs::copy(&real_index, &index)?;
    }

    let mut staged = git.clone().env("GIT_INDEX_FILE", &index);
    if ephemeral {
        let objects = scratch.path().join("objects");
        std::fs::create_dir_all(&objects)?;
        staged = staged
            .env("GIT_OBJECT_DIRECTORY", &objects)
            .env("GIT_ALTERNATE_OBJECT_DIRECTORIES", git.git_dir()?.join("objects"));
    }

    staged.add_all()?;
    staged.write_tree()
}

/// A commit whose tree equals the current working tree.
#[derive(Debug)]
pub struct Snapshot {
    pub commit: String,
    pub tree_hash: String,
    /// Set when a temporary ref had to be created; deleted on drop
    pub temp_ref: Option<TempRef>,
}

/// Capture the working tree of `repo` as a commit.
///
/// If the working tree matches `HEAD^{tree}`, HEAD itself is used. Otherwise
/// a new commit with HEAD as parent is created and pinned by
/// [`SNAPSHOT_REF`] until the returned snapshot is dropped.
pub fn capture(repo: &Path, stamp_ms: u128) -> Result<Snapshot> {
    let git = Git::new(repo);
    if !git.verify("HEAD") {
        return Err(CiError::Config(format!(
            "{} has no commits to snapshot against",
            repo.display()
        )));
    }

    let tree_hash = working_tree_hash(repo, false)?;
    if git.head_tree()? == tree_hash {
        let commit = git.head_commit()?;
        tracing::info!(%commit, "working tree matches HEAD");
        return Ok(Snapshot {
            commit,
            tree_hash,
            temp_ref: None,
        });
    }

    let commit = git.commit_tree(
        &tree_hash,
        "HEAD",
        &format!("ci: working-tree snapshot at {stamp_ms}"),
    )?;
    git.update_ref(SNAPSHOT_REF, &commit)?;
    tracing::info!(%commit, %tree_hash, "created working-tree commit");

    Ok(Snapshot {
        commit,
        tree_hash,
        temp_ref: Some(TempRef { git, name: SNAPSHOT_REF }),
    })
}

/// A ref that is deleted when dropped.
#[derive(Debug)]
pub struct TempRef {
    git: Git,
    name: &'static str,
}

impl Drop for TempRef {
    fn drop(&mut self) {
        if let Err(e) = self.git.delete_ref(self.name) {
            tracing::warn!(name = self.name, error = %e, "failed to delete temporary ref");
        }
    }
}
